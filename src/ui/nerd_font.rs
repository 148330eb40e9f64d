/// Icons used in agentpkg output.
///
/// Grouped by what the CLI reports on: outcomes, fetching, installed
/// content and shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NerdFont {
    // Outcomes
    Check,
    Cross,
    Warning,
    Info,

    // Fetching
    Globe,
    Archive,
    Search,

    // Installed content
    Package,
    FileText,
    List,
    Trash,

    // Shared state
    Lock,
    Shield,
    Gear,
}

impl NerdFont {
    /// Get the Unicode character for this nerd font icon
    pub const fn unicode(&self) -> char {
        match self {
            Self::Check => '\u{f00c}',    // fa-check
            Self::Cross => '\u{f00d}',    // fa-times
            Self::Warning => '\u{f071}',  // fa-exclamation-triangle
            Self::Info => '\u{f05a}',     // fa-info-circle
            Self::Globe => '\u{f0ac}',    // fa-globe
            Self::Archive => '\u{f187}',  // fa-archive
            Self::Search => '\u{f002}',   // fa-search
            Self::Package => '\u{f466}',  // fa-box
            Self::FileText => '\u{f15c}', // fa-file-text
            Self::List => '\u{f03a}',     // fa-list
            Self::Trash => '\u{f1f8}',    // fa-trash
            Self::Lock => '\u{f023}',     // fa-lock
            Self::Shield => '\u{f132}',   // fa-shield
            Self::Gear => '\u{f013}',     // fa-gear
        }
    }
}

impl std::fmt::Display for NerdFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.unicode())
    }
}

impl From<NerdFont> for char {
    fn from(icon: NerdFont) -> Self {
        icon.unicode()
    }
}
