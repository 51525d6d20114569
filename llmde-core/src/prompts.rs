use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crate::error::LlmdeError;
use crate::error::Result;

/// A prompt template shipped inside the binary.
#[derive(Debug, Clone, Copy)]
struct BuiltinPrompt {
    name: &'static str,
    markdown: &'static str,
    schema: Option<&'static str>,
}

const BUILTIN_PROMPTS: &[BuiltinPrompt] = &[
    BuiltinPrompt {
        name: "outcomes",
        markdown: include_str!("../assets/prompts/outcomes.md"),
        schema: None,
    },
    BuiltinPrompt {
        name: "study_design",
        markdown: include_str!("../assets/prompts/study_design.md"),
        schema: Some(include_str!("../assets/prompts/study_design.json")),
    },
];

const BUILTIN_SYSTEM_INSTRUCTIONS: &[(&str, &str)] = &[(
    "systematic_reviewer",
    include_str!("../assets/system/systematic_reviewer.md"),
)];

/// A prompt file plus the JSON schema constraining its answer, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSpec {
    pub prompt_path: PathBuf,
    pub json_schema: Option<PathBuf>,
}

impl PromptSpec {
    pub fn new(prompt_path: impl Into<PathBuf>, json_schema: Option<PathBuf>) -> Self {
        Self {
            prompt_path: prompt_path.into(),
            json_schema,
        }
    }

    /// File stem of the prompt; names the artifact produced for it.
    pub fn stem(&self) -> String {
        self.prompt_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "prompt".to_string())
    }
}

/// Builtin prompts and system instructions, materialised on disk so that
/// providers can read them like any user-supplied prompt file.
///
/// Layout under `root`:
///
/// ```text
/// prompts/<name>.md
/// prompts/<name>.json   # only when the prompt has a schema
/// system/<name>.md
/// ```
///
/// Existing files are never overwritten, so local edits to a builtin survive.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    root: PathBuf,
}

impl PromptLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list_builtin_prompts(&self) -> Vec<&'static str> {
        BUILTIN_PROMPTS.iter().map(|prompt| prompt.name).collect()
    }

    /// Names of builtin prompts that ship with a JSON schema.
    pub fn builtin_prompts_with_schema(&self) -> Vec<&'static str> {
        BUILTIN_PROMPTS
            .iter()
            .filter(|prompt| prompt.schema.is_some())
            .map(|prompt| prompt.name)
            .collect()
    }

    pub fn list_builtin_system_instructions(&self) -> Vec<&'static str> {
        BUILTIN_SYSTEM_INSTRUCTIONS
            .iter()
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn resolve_builtin_prompt(&self, name: &str) -> Result<PromptSpec> {
        let builtin = BUILTIN_PROMPTS
            .iter()
            .find(|prompt| prompt.name == name)
            .ok_or_else(|| LlmdeError::PromptNotFound {
                name: name.to_string(),
            })?;

        let dir = self.root.join("prompts");
        let prompt_path = dir.join(format!("{name}.md"));
        write_if_absent(&prompt_path, builtin.markdown)?;

        let json_schema = match builtin.schema {
            Some(schema) => {
                let schema_path = dir.join(format!("{name}.json"));
                write_if_absent(&schema_path, schema)?;
                Some(schema_path)
            }
            None => None,
        };

        Ok(PromptSpec {
            prompt_path,
            json_schema,
        })
    }

    pub fn resolve_builtin_system_instruction(&self, name: &str) -> Result<PathBuf> {
        let (_, markdown) = BUILTIN_SYSTEM_INSTRUCTIONS
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .ok_or_else(|| LlmdeError::SystemInstructionNotFound {
                name: name.to_string(),
            })?;

        let path = self.root.join("system").join(format!("{name}.md"));
        write_if_absent(&path, markdown)?;
        Ok(path)
    }

    /// Builtin name first, otherwise an existing file. A file prompt picks
    /// up `<stem>.json` next to it as its schema.
    pub fn resolve_prompt(&self, name: &str) -> Result<PromptSpec> {
        if BUILTIN_PROMPTS.iter().any(|prompt| prompt.name == name) {
            return self.resolve_builtin_prompt(name);
        }

        let path = PathBuf::from(name);
        if !path.is_file() {
            return Err(LlmdeError::PromptNotFound {
                name: name.to_string(),
            });
        }

        let schema = path.with_extension("json");
        let json_schema = (schema != path && schema.is_file()).then_some(schema);
        Ok(PromptSpec::new(path, json_schema))
    }

    /// Text of a builtin system instruction or of an existing file.
    pub fn resolve_system_instruction(&self, name: &str) -> Result<String> {
        let path = if BUILTIN_SYSTEM_INSTRUCTIONS
            .iter()
            .any(|(builtin, _)| *builtin == name)
        {
            self.resolve_builtin_system_instruction(name)?
        } else {
            let path = PathBuf::from(name);
            if !path.is_file() {
                return Err(LlmdeError::SystemInstructionNotFound {
                    name: name.to_string(),
                });
            }
            path
        };

        fs::read_to_string(&path).map_err(|err| LlmdeError::io(&path, err))
    }

    /// Resolve every name, stopping at the first one that cannot be found.
    pub fn resolve_prompts<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PromptSpec>> {
        names
            .iter()
            .map(|name| self.resolve_prompt(name.as_ref()))
            .collect()
    }
}

/// Split a comma-separated prompt list, trimming names and dropping blanks.
pub fn parse_prompt_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LlmdeError::io(parent, err))?;
    }
    fs::write(path, content).map_err(|err| LlmdeError::io(path, err))
}
