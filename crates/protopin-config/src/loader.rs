//! `protopin.toml` parsing and validation.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use toml::Spanned;

use protopin_core::kind::validate_component;
use protopin_core::{ToolKind, ToolRef, VersionSpec};

use crate::error::{ConfigError, Result};
use crate::types::{CompileSettings, Config, ConfigItem, PostAction};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    root: bool,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    tool: Vec<RawTool>,
    #[serde(default)]
    compile: RawCompile,
    #[serde(default)]
    post_action: Vec<RawPostAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTool {
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    version: Option<Spanned<String>>,
    #[serde(default)]
    include: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCompile {
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    import_paths: Vec<String>,
    #[serde(default)]
    work_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawPostAction {
    Command { args: Vec<String> },
    Shell { script: String },
    Copy { from: String, to: String },
    Move { from: String, to: String },
    Remove { path: String },
}

/// Load and validate the config at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let path = absolute(path)?;
    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
    parse_config(&path, &text)
}

/// Load only the declared tools of the config at `path`, in file order.
pub fn load_config_items(path: &Path) -> Result<Vec<ConfigItem>> {
    load_config(path).map(|config| config.items)
}

/// Parse config text as if it were read from `path`.
pub fn parse_config(path: &Path, text: &str) -> Result<Config> {
    // Syntax first, so malformed TOML and schema violations stay distinct.
    text.parse::<toml::Table>().map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string().trim_end().to_string(),
    })?;
    let raw: RawConfig =
        toml::from_str(text).map_err(|e| ConfigError::schema(path, e.message().to_string()))?;

    let dir = path
        .parent()
        .map(normalize)
        .ok_or_else(|| ConfigError::schema(path, "config path has no parent directory"))?;

    let items = build_items(path, raw.tool)?;

    let scopes = raw
        .scopes
        .iter()
        .map(|scope| confined(path, &dir, scope, "scope"))
        .collect::<Result<Vec<_>>>()?;

    let compile = CompileSettings {
        options: raw.compile.options,
        import_paths: raw
            .compile
            .import_paths
            .iter()
            .map(|p| resolve(&dir, p))
            .collect(),
        work_dir: raw
            .compile
            .work_dir
            .as_deref()
            .map(|p| resolve(&dir, p))
            .unwrap_or_else(|| dir.clone()),
    };

    let post_actions = raw
        .post_action
        .into_iter()
        .map(|action| build_post_action(path, &dir, action))
        .collect::<Result<Vec<_>>>()?;

    Ok(Config {
        path: Some(path.to_path_buf()),
        dir,
        root: raw.root,
        scopes,
        items,
        compile,
        post_actions,
    })
}

fn build_items(path: &Path, tools: Vec<RawTool>) -> Result<Vec<ConfigItem>> {
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(tools.len());

    for (index, raw) in tools.into_iter().enumerate() {
        let at = |message: String| ConfigError::schema(path, format!("tool #{}: {message}", index + 1));

        let kind: ToolKind = raw.kind.parse().map_err(at)?;
        let name = match (kind, raw.name) {
            (_, Some(name)) => name,
            (ToolKind::Protoc, None) => "protoc".to_string(),
            (_, None) => return Err(at(format!("{kind} requires a `name`"))),
        };
        validate_component("name", &name).map_err(|e| at(e.to_string()))?;
        if kind == ToolKind::Plugin && !name.starts_with("protoc-gen-") {
            return Err(at(format!(
                "plugin name '{name}' must start with 'protoc-gen-'"
            )));
        }
        if kind != ToolKind::Protoc && raw.source.is_none() {
            return Err(at(format!("{kind} '{name}' requires a `source`")));
        }
        if raw.include.is_some() && kind != ToolKind::Repository {
            return Err(at(format!("`include` is only valid for repositories, not {kind}")));
        }
        if let Some(include) = &raw.include {
            if escapes(include) {
                return Err(at(format!("include '{include}' escapes the repository")));
            }
        }

        let version = raw
            .version
            .ok_or_else(|| at(format!("{kind} '{name}' requires a `version`")))?;
        let span = version.span();
        let specifier = version.into_inner();
        let spec = VersionSpec::parse(kind, &specifier).map_err(|e| at(e.to_string()))?;

        if !seen.insert((kind, name.clone())) {
            return Err(at(format!("duplicate declaration of {kind} '{name}'")));
        }
        if kind == ToolKind::Protoc && seen.iter().filter(|(k, _)| *k == ToolKind::Protoc).count() > 1
        {
            return Err(at("only one protoc may be declared per config".to_string()));
        }

        let mut tool = ToolRef::new(kind, name);
        tool.source = raw.source;
        items.push(ConfigItem {
            tool,
            resolved: spec.pinned().map(str::to_string),
            specifier,
            include: raw.include,
            span: Some(span),
        });
    }

    Ok(items)
}

fn build_post_action(path: &Path, dir: &Path, raw: RawPostAction) -> Result<PostAction> {
    let action = match raw {
        RawPostAction::Command { args } => {
            if args.first().map_or(true, |program| program.trim().is_empty()) {
                return Err(ConfigError::schema(
                    path,
                    "command post-action requires a non-empty `args` list",
                ));
            }
            PostAction::Command { args }
        }
        RawPostAction::Shell { script } => PostAction::Shell { script },
        RawPostAction::Copy { from, to } => PostAction::Copy {
            from: confined(path, dir, &from, "post-action path")?,
            to: confined(path, dir, &to, "post-action path")?,
        },
        RawPostAction::Move { from, to } => PostAction::Move {
            from: confined(path, dir, &from, "post-action path")?,
            to: confined(path, dir, &to, "post-action path")?,
        },
        RawPostAction::Remove { path: target } => PostAction::Remove {
            path: confined(path, dir, &target, "post-action path")?,
        },
    };
    Ok(action)
}

/// Resolve `raw` against `dir`, rejecting results outside `dir`.
fn confined(path: &Path, dir: &Path, raw: &str, what: &str) -> Result<PathBuf> {
    let resolved = resolve(dir, raw);
    if resolved.starts_with(dir) {
        Ok(resolved)
    } else {
        Err(ConfigError::schema(
            path,
            format!("{what} '{raw}' escapes {}", dir.display()),
        ))
    }
}

fn resolve(dir: &Path, raw: &str) -> PathBuf {
    normalize(&dir.join(raw))
}

fn escapes(relative: &str) -> bool {
    let path = Path::new(relative);
    path.is_absolute() || !normalize(&Path::new("/r").join(path)).starts_with("/r")
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir().map_err(|e| ConfigError::io(path, e))?;
    Ok(normalize(&cwd.join(path)))
}

/// Starter config written by `protopin init`.
pub fn template() -> &'static str {
    r#"# Toolchain for the .proto files under this directory.
# `protopin tidy` pins every floating version below in place.

[[tool]]
kind = "protoc"
version = "latest"

# [[tool]]
# kind = "plugin"
# name = "protoc-gen-go"
# source = "google.golang.org/protobuf/cmd/protoc-gen-go"
# version = "latest"

# [[tool]]
# kind = "repository"
# name = "googleapis"
# source = "https://github.com/googleapis/googleapis"
# version = "master"

[compile]
options = ["--cpp_out=."]
import_paths = ["."]

# [[post_action]]
# kind = "command"
# args = ["clang-format", "-i", "example.pb.h"]
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Config> {
        parse_config(Path::new("/work/protopin.toml"), text)
    }

    fn schema_message(text: &str) -> String {
        match parse(text) {
            Err(ConfigError::Schema { message, .. }) => message,
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn parse_full_config() {
        let config = parse(
            r#"
root = true
scopes = ["api"]

[[tool]]
kind = "protoc"
version = "3.19.4"

[[tool]]
kind = "plugin"
name = "protoc-gen-go"
source = "google.golang.org/protobuf/cmd/protoc-gen-go"
version = "^1.28"

[[tool]]
kind = "repository"
name = "googleapis"
source = "https://github.com/googleapis/googleapis"
version = "master"
include = "google"

[compile]
options = ["--go_out=."]
import_paths = [".", "../shared"]
work_dir = "api"

[[post_action]]
kind = "shell"
script = "gofmt -w ."

[[post_action]]
kind = "copy"
from = "api/a.pb.go"
to = "out/a.pb.go"
"#,
        )
        .unwrap();

        assert!(config.root);
        assert_eq!(config.dir, PathBuf::from("/work"));
        assert_eq!(config.scopes, vec![PathBuf::from("/work/api")]);
        assert_eq!(config.items.len(), 3);

        let protoc = config.protoc().unwrap();
        assert_eq!(protoc.name(), "protoc");
        assert_eq!(protoc.resolved.as_deref(), Some("3.19.4"));

        let plugin = config.item(ToolKind::Plugin, "protoc-gen-go").unwrap();
        assert!(!plugin.is_pinned());
        assert_eq!(
            plugin.tool.source.as_deref(),
            Some("google.golang.org/protobuf/cmd/protoc-gen-go")
        );

        let repo = config.item(ToolKind::Repository, "googleapis").unwrap();
        assert_eq!(repo.include.as_deref(), Some("google"));

        assert_eq!(
            config.compile.import_paths,
            vec![PathBuf::from("/work"), PathBuf::from("/shared")]
        );
        assert_eq!(config.compile.work_dir, PathBuf::from("/work/api"));
        assert_eq!(config.post_actions.len(), 2);
        assert_eq!(
            config.post_actions[1],
            PostAction::Copy {
                from: PathBuf::from("/work/api/a.pb.go"),
                to: PathBuf::from("/work/out/a.pb.go"),
            }
        );
    }

    #[test]
    fn spans_cover_the_version_literal() {
        let text = "[[tool]]\nkind = \"protoc\"\nversion = \"latest\"\n";
        let config = parse(text).unwrap();
        let span = config.items[0].span.clone().unwrap();
        assert_eq!(&text[span], "\"latest\"");
    }

    #[test]
    fn empty_file_is_valid() {
        let config = parse("").unwrap();
        assert!(config.items.is_empty());
        assert!(!config.root);
        assert_eq!(config.compile.work_dir, PathBuf::from("/work"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            parse("[[tool]\nkind = "),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_a_schema_error() {
        let message = schema_message("[[tool]]\nkind = \"compiler\"\nversion = \"1.0\"\n");
        assert!(message.contains("unknown kind"), "{message}");
    }

    #[test]
    fn missing_required_fields() {
        let message = schema_message("[[tool]]\nkind = \"protoc\"\n");
        assert!(message.contains("requires a `version`"), "{message}");

        let message = schema_message("[[tool]]\nkind = \"plugin\"\nversion = \"latest\"\n");
        assert!(message.contains("requires a `name`"), "{message}");

        let message = schema_message(
            "[[tool]]\nkind = \"repository\"\nname = \"googleapis\"\nversion = \"master\"\n",
        );
        assert!(message.contains("requires a `source`"), "{message}");
    }

    #[test]
    fn duplicates_are_rejected() {
        let message = schema_message(
            "[[tool]]\nkind = \"protoc\"\nversion = \"3.19.4\"\n\
             [[tool]]\nkind = \"protoc\"\nversion = \"latest\"\n",
        );
        assert!(message.contains("duplicate"), "{message}");

        let message = schema_message(
            "[[tool]]\nkind = \"protoc\"\nversion = \"3.19.4\"\n\
             [[tool]]\nkind = \"protoc\"\nname = \"protoc-alt\"\nversion = \"3.20.0\"\n",
        );
        assert!(message.contains("only one protoc"), "{message}");
    }

    #[test]
    fn invalid_names_and_versions() {
        let message = schema_message(
            "[[tool]]\nkind = \"plugin\"\nname = \"../gen\"\nsource = \"x\"\nversion = \"latest\"\n",
        );
        assert!(message.contains("name"), "{message}");

        let message = schema_message(
            "[[tool]]\nkind = \"plugin\"\nname = \"go\"\nsource = \"x\"\nversion = \"latest\"\n",
        );
        assert!(message.contains("protoc-gen-"), "{message}");

        let message = schema_message("[[tool]]\nkind = \"protoc\"\nversion = \"not a version\"\n");
        assert!(message.contains("invalid version"), "{message}");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            parse("[[tool]]\nkind = \"protoc\"\nverison = \"3.19.4\"\n"),
            Err(ConfigError::Schema { .. })
        ));
    }

    #[test]
    fn post_action_paths_are_confined() {
        let message = schema_message(
            "[[post_action]]\nkind = \"remove\"\npath = \"../../etc/passwd\"\n",
        );
        assert!(message.contains("escapes"), "{message}");

        let message = schema_message("[[post_action]]\nkind = \"command\"\nargs = []\n");
        assert!(message.contains("non-empty"), "{message}");
    }

    #[test]
    fn include_cannot_escape_checkout() {
        let message = schema_message(
            "[[tool]]\nkind = \"repository\"\nname = \"r\"\nsource = \"u\"\n\
             version = \"master\"\ninclude = \"../x\"\n",
        );
        assert!(message.contains("escapes"), "{message}");
    }

    #[test]
    fn template_is_a_valid_config() {
        let config = parse(template()).unwrap();
        assert_eq!(config.items.len(), 1);
        assert!(!config.is_tidied());
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protopin.toml");
        std::fs::write(&path, "[[tool]]\nkind = \"protoc\"\nversion = \"21.12\"\n").unwrap();

        let items = load_config_items(&path).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].resolved.as_deref(), Some("21.12"));

        let missing = load_config(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
