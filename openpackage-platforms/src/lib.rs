#![deny(missing_docs)]

//! Platform definitions for the AI coding assistants openpackage knows how
//! to install into, plus detection of which of them a workspace uses.
//!
//! Everything here is data: a platform is a root dir, an optional root file,
//! and a table mapping each universal subdir onto a native
//! path/read-extensions/write-extension triple. The main entry points are
//! [`PlatformDefinition::get`][], [`detect_platforms`][], and the path
//! translation functions in [`mapper`][].

use std::fmt;

use camino::Utf8Path;
use tracing::debug;

pub mod errors;
pub mod mapper;

pub use errors::PlatformError;

use errors::Result;

/// The root file shared (ambiguously) by several platforms.
///
/// Because more than one platform reads `AGENTS.md`, its presence alone
/// never identifies a platform during detection.
pub const AGENTS_ROOT_FILE: &str = "AGENTS.md";

/// Identity of a supported platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum PlatformId {
    Augment,
    Claude,
    Codex,
    Cursor,
    Factory,
    Gemini,
    Kilo,
    Kiro,
    OpenCode,
    Qwen,
    Roo,
    Warp,
    Windsurf,
}

/// Every platform id, in canonical (alphabetical) order
pub const ALL_PLATFORMS: &[PlatformId] = &[
    PlatformId::Augment,
    PlatformId::Claude,
    PlatformId::Codex,
    PlatformId::Cursor,
    PlatformId::Factory,
    PlatformId::Gemini,
    PlatformId::Kilo,
    PlatformId::Kiro,
    PlatformId::OpenCode,
    PlatformId::Qwen,
    PlatformId::Roo,
    PlatformId::Warp,
    PlatformId::Windsurf,
];

impl PlatformId {
    /// The lowercase id string used in filenames and config
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Augment => "augment",
            PlatformId::Claude => "claude",
            PlatformId::Codex => "codex",
            PlatformId::Cursor => "cursor",
            PlatformId::Factory => "factory",
            PlatformId::Gemini => "gemini",
            PlatformId::Kilo => "kilo",
            PlatformId::Kiro => "kiro",
            PlatformId::OpenCode => "opencode",
            PlatformId::Qwen => "qwen",
            PlatformId::Roo => "roo",
            PlatformId::Warp => "warp",
            PlatformId::Windsurf => "windsurf",
        }
    }

    /// Parse a lowercase id string
    pub fn parse(input: &str) -> Result<Self> {
        let id = match input.trim().to_ascii_lowercase().as_str() {
            "augment" => PlatformId::Augment,
            "claude" => PlatformId::Claude,
            "codex" => PlatformId::Codex,
            "cursor" => PlatformId::Cursor,
            "factory" => PlatformId::Factory,
            "gemini" => PlatformId::Gemini,
            "kilo" => PlatformId::Kilo,
            "kiro" => PlatformId::Kiro,
            "opencode" => PlatformId::OpenCode,
            "qwen" => PlatformId::Qwen,
            "roo" => PlatformId::Roo,
            "warp" => PlatformId::Warp,
            "windsurf" => PlatformId::Windsurf,
            _ => {
                return Err(PlatformError::UnknownPlatform {
                    input: input.to_owned(),
                })
            }
        };
        Ok(id)
    }

    /// This platform's definition row
    pub fn definition(&self) -> &'static PlatformDefinition {
        PlatformDefinition::get(*self)
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The universal subdirs a package can carry content under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum UniversalSubdir {
    Rules,
    Commands,
    Agents,
    Skills,
}

/// Every universal subdir
pub const ALL_SUBDIRS: &[UniversalSubdir] = &[
    UniversalSubdir::Rules,
    UniversalSubdir::Commands,
    UniversalSubdir::Agents,
    UniversalSubdir::Skills,
];

impl UniversalSubdir {
    /// The directory name this subdir uses in registry paths
    pub fn as_str(&self) -> &'static str {
        match self {
            UniversalSubdir::Rules => "rules",
            UniversalSubdir::Commands => "commands",
            UniversalSubdir::Agents => "agents",
            UniversalSubdir::Skills => "skills",
        }
    }

    /// Parse a directory name back into a subdir
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "rules" => Some(UniversalSubdir::Rules),
            "commands" => Some(UniversalSubdir::Commands),
            "agents" => Some(UniversalSubdir::Agents),
            "skills" => Some(UniversalSubdir::Skills),
            _ => None,
        }
    }

    /// Split a registry path like `commands/pkg/setup.md` into
    /// `(Commands, "pkg/setup.md")`
    pub fn split_registry_path(path: &str) -> Option<(Self, &str)> {
        let (head, rest) = path.split_once('/')?;
        let subdir = Self::parse(head)?;
        if rest.is_empty() {
            return None;
        }
        Some((subdir, rest))
    }
}

impl fmt::Display for UniversalSubdir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one universal subdir maps into a platform's native layout
#[derive(Debug, Clone, Copy)]
pub struct SubdirDef {
    /// The universal subdir this row maps
    pub subdir: UniversalSubdir,
    /// Path of the native dir, relative to the platform root dir
    pub path: &'static str,
    /// Extensions (without dots) accepted when reading, in preference order
    pub read_exts: &'static [&'static str],
    /// The single extension (without dot) used when writing
    pub write_ext: &'static str,
}

/// Everything openpackage knows about one platform
#[derive(Debug, Clone, Copy)]
pub struct PlatformDefinition {
    /// Which platform this is
    pub id: PlatformId,
    /// The platform's config dir at the workspace root, e.g. `.cursor`
    pub root_dir: &'static str,
    /// The platform's root markdown file, if it has one
    pub root_file: Option<&'static str>,
    /// Native locations for the universal subdirs this platform supports
    pub subdirs: &'static [SubdirDef],
}

macro_rules! subdir {
    ($subdir:ident, $path:literal, [$($read:literal),+], $write:literal) => {
        SubdirDef {
            subdir: UniversalSubdir::$subdir,
            path: $path,
            read_exts: &[$($read),+],
            write_ext: $write,
        }
    };
}

static PLATFORM_TABLE: &[PlatformDefinition] = &[
    PlatformDefinition {
        id: PlatformId::Augment,
        root_dir: ".augment",
        root_file: None,
        subdirs: &[subdir!(Rules, "rules", ["md"], "md")],
    },
    PlatformDefinition {
        id: PlatformId::Claude,
        root_dir: ".claude",
        root_file: Some("CLAUDE.md"),
        subdirs: &[
            subdir!(Commands, "commands", ["md"], "md"),
            subdir!(Agents, "agents", ["md"], "md"),
            subdir!(Skills, "skills", ["md"], "md"),
        ],
    },
    PlatformDefinition {
        id: PlatformId::Codex,
        root_dir: ".codex",
        root_file: Some(AGENTS_ROOT_FILE),
        subdirs: &[subdir!(Commands, "prompts", ["md"], "md")],
    },
    PlatformDefinition {
        id: PlatformId::Cursor,
        root_dir: ".cursor",
        root_file: Some(AGENTS_ROOT_FILE),
        subdirs: &[
            subdir!(Rules, "rules", ["mdc", "md"], "mdc"),
            subdir!(Commands, "commands", ["md"], "md"),
        ],
    },
    PlatformDefinition {
        id: PlatformId::Factory,
        root_dir: ".factory",
        root_file: Some(AGENTS_ROOT_FILE),
        subdirs: &[
            subdir!(Rules, "rules", ["md"], "md"),
            subdir!(Agents, "droids", ["md"], "md"),
        ],
    },
    PlatformDefinition {
        id: PlatformId::Gemini,
        root_dir: ".gemini",
        root_file: Some("GEMINI.md"),
        subdirs: &[subdir!(Commands, "commands", ["toml"], "toml")],
    },
    PlatformDefinition {
        id: PlatformId::Kilo,
        root_dir: ".kilocode",
        root_file: None,
        subdirs: &[
            subdir!(Rules, "rules", ["md"], "md"),
            subdir!(Commands, "workflows", ["md"], "md"),
        ],
    },
    PlatformDefinition {
        id: PlatformId::Kiro,
        root_dir: ".kiro",
        root_file: None,
        subdirs: &[subdir!(Rules, "steering", ["md"], "md")],
    },
    PlatformDefinition {
        id: PlatformId::OpenCode,
        root_dir: ".opencode",
        root_file: Some(AGENTS_ROOT_FILE),
        subdirs: &[
            subdir!(Commands, "command", ["md"], "md"),
            subdir!(Agents, "agent", ["md"], "md"),
        ],
    },
    PlatformDefinition {
        id: PlatformId::Qwen,
        root_dir: ".qwen",
        root_file: Some("QWEN.md"),
        subdirs: &[subdir!(Commands, "commands", ["toml"], "toml")],
    },
    PlatformDefinition {
        id: PlatformId::Roo,
        root_dir: ".roo",
        root_file: None,
        subdirs: &[
            subdir!(Rules, "rules", ["md"], "md"),
            subdir!(Commands, "commands", ["md"], "md"),
        ],
    },
    PlatformDefinition {
        id: PlatformId::Warp,
        root_dir: ".warp",
        root_file: Some("WARP.md"),
        subdirs: &[subdir!(Rules, "rules", ["md"], "md")],
    },
    PlatformDefinition {
        id: PlatformId::Windsurf,
        root_dir: ".windsurf",
        root_file: None,
        subdirs: &[
            subdir!(Rules, "rules", ["md"], "md"),
            subdir!(Commands, "workflows", ["md"], "md"),
        ],
    },
];

impl PlatformDefinition {
    /// Fetch a platform's definition
    pub fn get(id: PlatformId) -> &'static PlatformDefinition {
        PLATFORM_TABLE
            .iter()
            .find(|def| def.id == id)
            .expect("platform table covers every id")
    }

    /// All platform definitions, in canonical order
    pub fn all() -> impl Iterator<Item = &'static PlatformDefinition> {
        PLATFORM_TABLE.iter()
    }

    /// Find the platform that owns a root dir name like `.cursor`
    pub fn by_root_dir(root_dir: &str) -> Option<&'static PlatformDefinition> {
        PLATFORM_TABLE.iter().find(|def| def.root_dir == root_dir)
    }

    /// The subdir row for a universal subdir, if this platform supports it
    pub fn subdir(&self, subdir: UniversalSubdir) -> Option<&SubdirDef> {
        self.subdirs.iter().find(|def| def.subdir == subdir)
    }

    /// This platform's root file, when it's unambiguously its own
    /// (i.e. not the shared `AGENTS.md`)
    pub fn unique_root_file(&self) -> Option<&'static str> {
        self.root_file.filter(|&file| file != AGENTS_ROOT_FILE)
    }
}

/// Which platforms a workspace uses.
///
/// A platform is detected iff its root dir exists in the workspace, or its
/// unique root file (the shared `AGENTS.md` never counts) exists at the
/// workspace root.
pub fn detect_platforms(workspace_dir: &Utf8Path) -> Vec<PlatformId> {
    let mut detected = vec![];
    for def in PlatformDefinition::all() {
        let root_dir_hit = workspace_dir.join(def.root_dir).is_dir();
        let root_file_hit = def
            .unique_root_file()
            .map(|file| workspace_dir.join(file).is_file())
            .unwrap_or(false);
        if root_dir_hit || root_file_hit {
            detected.push(def.id);
        }
    }
    debug!("detected platforms in {workspace_dir}: {detected:?}");
    detected
}

/// Every root file name any platform can own, including the shared one.
pub fn known_root_files() -> Vec<&'static str> {
    let mut files = vec![AGENTS_ROOT_FILE];
    for def in PlatformDefinition::all() {
        if let Some(file) = def.unique_root_file() {
            if !files.contains(&file) {
                files.push(file);
            }
        }
    }
    files
}
