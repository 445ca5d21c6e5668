//! Purpose: Resolve a language identifier plus file path into a child-process argv.
//! Exports: `Language`, `LanguageKind`, `LaunchSpec`, `resolve`.
//! Role: Pure resolver used by the caller bridge and the `resolve` CLI command.
//! Invariants: Extension validation runs before any filesystem access.
//! Invariants: Compiled targets given as bare relative paths are prefixed with `./`.
//! Invariants: Resolving the same inputs against an unchanged filesystem yields the same argv.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

use crate::core::error::{Error, ErrorKind};

const RESOLVE_HINT: &str = "Check the target path and that the language runtime is installed.";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LanguageKind {
    /// Run through an interpreter that reads the file.
    Script,
    /// Run through a launcher with flags (e.g. `java -jar`).
    Archive,
    /// Executed directly; needs the execute bit.
    Compiled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Language {
    Python,
    JavaScript,
    Ruby,
    C,
    CSharp,
    Cpp,
    Java,
    Rust,
    Go,
}

impl Language {
    /// Case-insensitive lookup over every accepted alias.
    pub fn parse(name: &str) -> Option<Self> {
        let key = name.trim().to_ascii_uppercase();
        let language = match key.as_str() {
            "PYTHON" | "PY" => Language::Python,
            "JAVASCRIPT" | "JS" | "NODE" | "NODEJS" => Language::JavaScript,
            "RUBY" | "RB" => Language::Ruby,
            "C" => Language::C,
            "CS" | "C#" | "CSHARP" => Language::CSharp,
            "CPP" | "C++" | "CPLUSPLUS" | "EXE" => Language::Cpp,
            "JAR" | "JAVA" => Language::Java,
            "RUST" | "RS" => Language::Rust,
            "GO" | "GOLANG" => Language::Go,
            _ => return None,
        };
        Some(language)
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Ruby => "ruby",
            Language::C => "c",
            Language::CSharp => "csharp",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }

    pub fn kind(self) -> LanguageKind {
        match self {
            Language::Python | Language::JavaScript | Language::Ruby => LanguageKind::Script,
            Language::Java => LanguageKind::Archive,
            Language::C | Language::CSharp | Language::Cpp | Language::Rust | Language::Go => {
                LanguageKind::Compiled
            }
        }
    }

    /// Lowercase extensions including the dot; `""` means "no extension".
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            Language::Python => &[".py"],
            Language::JavaScript => &[".js"],
            Language::Ruby => &[".rb"],
            Language::C => &[".c", ".out", ".exe", ""],
            Language::CSharp => &[".exe", ".dll", ""],
            Language::Cpp => &[".cpp", ".cc", ".cxx", ".out", ".exe", ""],
            Language::Java => &[".jar"],
            Language::Rust => &[".rs", ".exe", ".out", ""],
            Language::Go => &[".go", ".exe", ".out", ""],
        }
    }

    fn argv(self, file: String, extension: &str) -> Vec<String> {
        match self {
            Language::Python => vec!["python".to_string(), file],
            Language::JavaScript => vec!["node".to_string(), file],
            Language::Ruby => vec!["ruby".to_string(), file],
            Language::Java => vec!["java".to_string(), "-jar".to_string(), file],
            Language::CSharp if extension == ".dll" => vec!["dotnet".to_string(), file],
            Language::Go if extension == ".go" => {
                vec!["go".to_string(), "run".to_string(), file]
            }
            Language::C | Language::CSharp | Language::Cpp | Language::Rust | Language::Go => {
                vec![file]
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
}

impl LaunchSpec {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Bare command; stdio wiring is left to the caller.
    pub fn command(&self) -> Command {
        let mut command = Command::new(self.program());
        command.args(self.args());
        command
    }
}

pub fn resolve(language: &str, file: &str) -> Result<LaunchSpec, Error> {
    let parsed = Language::parse(language);
    let file = normalize_separators(file);
    let extension = extension_of(&file);

    if let Some(lang) = parsed {
        let accepted = lang.accepted_extensions();
        if !accepted.contains(&extension.as_str()) {
            let expected = accepted
                .iter()
                .map(|ext| if ext.is_empty() { "(no extension)" } else { ext })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::new(ErrorKind::InvalidExtension)
                .with_message(format!(
                    "Invalid file '{file}' for language '{language}'. Expected: e.g. 'file{expected}'"
                ))
                .with_path(&file)
                .with_hint(format!("Accepted extensions for {}: {expected}", lang.name())));
        }
    }

    let path = Path::new(&file);
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::new(ErrorKind::FileNotFound)
                .with_message(format!("File not found: {file}"))
                .with_path(&file)
                .with_hint(RESOLVE_HINT));
        }
        Err(err) => {
            return Err(Error::new(ErrorKind::PermissionDenied)
                .with_message(format!("Cannot inspect file: {file}"))
                .with_path(&file)
                .with_source(err));
        }
    };
    if !metadata.is_file() {
        return Err(Error::new(ErrorKind::NotAFile)
            .with_message(format!("Path is not a file: {file}"))
            .with_path(&file));
    }

    let compiled = parsed.map(|lang| lang.kind()) == Some(LanguageKind::Compiled);
    if compiled {
        if !is_executable(path) {
            return Err(Error::new(ErrorKind::PermissionDenied)
                .with_message(format!("File is not executable: {file}"))
                .with_path(&file)
                .with_hint("Set the execute bit (chmod +x) on the built binary."));
        }
    } else if !is_readable(path) {
        return Err(Error::new(ErrorKind::PermissionDenied)
            .with_message(format!("File is not readable: {file}"))
            .with_path(&file));
    }

    let Some(lang) = parsed else {
        return Err(Error::new(ErrorKind::UnsupportedLanguage)
            .with_message(format!("Unsupported language: {language}"))
            .with_hint("Use one of: python, javascript, ruby, c, csharp, cpp, java, rust, go."));
    };

    let file = if compiled { explicit_relative(file) } else { file };
    let argv = lang.argv(file, &extension);
    tracing::debug!(language = lang.name(), ?argv, "resolved launch command");
    Ok(LaunchSpec { argv })
}

fn normalize_separators(file: &str) -> String {
    if cfg!(windows) {
        file.replace('/', "\\")
    } else {
        file.to_string()
    }
}

fn extension_of(file: &str) -> String {
    Path::new(file)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

// Keeps the OS from searching PATH for a same-named binary.
fn explicit_relative(file: String) -> String {
    if Path::new(&file).is_absolute() || file.starts_with("./") || file.starts_with(".\\") {
        file
    } else {
        format!("./{file}")
    }
}

#[cfg(unix)]
fn has_access(path: &Path, mode: libc::c_int) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    has_access(path, libc::X_OK)
}

#[cfg(unix)]
fn is_readable(path: &Path) -> bool {
    has_access(path, libc::R_OK)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(not(unix))]
fn is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}
