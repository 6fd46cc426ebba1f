//! Language table: file extension to the command line run inside the sandbox.
//!
//! Compiled languages compile and run in one shell line so a single exec
//! reports both compiler errors and program output.

use std::path::Path;

/// How a source file is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Shell,
    C,
    Cpp,
    Java,
}

impl Language {
    /// Look up a language by extension (without the dot, case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            "sh" => Some(Language::Shell),
            "c" => Some(Language::C),
            "cpp" | "cc" | "cxx" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    /// Look up a language from a file path.
    pub fn for_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Shell => "shell",
            Language::C => "c",
            Language::Cpp => "c++",
            Language::Java => "java",
        }
    }

    /// Shell command that runs `container_path` (an absolute path inside the
    /// container).
    pub fn command(&self, container_path: &str) -> String {
        let path = Path::new(container_path);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main");
        let dir = path
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");
        let quoted = shell_quote(container_path);

        match self {
            Language::Python => format!("python {quoted}"),
            Language::JavaScript => format!("node {quoted}"),
            Language::Shell => format!("bash {quoted}"),
            Language::C => {
                let out = shell_quote(&format!("/tmp/{stem}"));
                format!("gcc {quoted} -o {out} && {out}")
            }
            Language::Cpp => {
                let out = shell_quote(&format!("/tmp/{stem}"));
                format!("g++ {quoted} -o {out} && {out}")
            }
            Language::Java => format!(
                "javac -d /tmp/classes {quoted} && java -cp /tmp/classes:{} {}",
                shell_quote(dir),
                shell_quote(stem)
            ),
        }
    }
}

/// Single-quote a string for `sh -c`.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_map_to_languages() {
        assert_eq!(Language::for_path("main.py"), Some(Language::Python));
        assert_eq!(Language::for_path("src/app.JS"), Some(Language::JavaScript));
        assert_eq!(Language::for_path("run.sh"), Some(Language::Shell));
        assert_eq!(Language::for_path("a.c"), Some(Language::C));
        assert_eq!(Language::for_path("a.cpp"), Some(Language::Cpp));
        assert_eq!(Language::for_path("Main.java"), Some(Language::Java));
        assert_eq!(Language::for_path("readme.md"), None);
        assert_eq!(Language::for_path("Makefile"), None);
    }

    #[test]
    fn interpreted_commands() {
        assert_eq!(
            Language::Python.command("/app/data/main.py"),
            "python /app/data/main.py"
        );
        assert_eq!(Language::JavaScript.command("/app/data/x.js"), "node /app/data/x.js");
        assert_eq!(Language::Shell.command("/app/data/x.sh"), "bash /app/data/x.sh");
    }

    #[test]
    fn compiled_commands_compile_then_run() {
        let cmd = Language::C.command("/app/data/hello.c");
        assert_eq!(cmd, "gcc /app/data/hello.c -o /tmp/hello && /tmp/hello");

        let cmd = Language::Java.command("/app/data/src/Main.java");
        assert!(cmd.starts_with("javac -d /tmp/classes /app/data/src/Main.java && java"));
        assert!(cmd.ends_with(" Main"));
    }

    #[test]
    fn quoting_neutralizes_metacharacters() {
        assert_eq!(shell_quote("/app/data/a b.py"), "'/app/data/a b.py'");
        assert_eq!(shell_quote("x;rm -rf /"), "'x;rm -rf /'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
