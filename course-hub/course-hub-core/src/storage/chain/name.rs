use std::fmt;

/// Width in bytes of the code prefix and the next-code suffix.
pub const CODE_WIDTH: usize = 4;
/// Encoded "no successor" marker.
pub const NULL_CODE: &str = "----";

const MAX_FILE_NAME: usize = 255;

/// Fixed-width identifier of a node, unique within its chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeCode(u16);

impl NodeCode {
    pub const ROOT: NodeCode = NodeCode(1000);
    pub const FIRST: NodeCode = NodeCode(1001);
    pub const MAX: NodeCode = NodeCode(9999);

    pub fn new(value: u16) -> Option<Self> {
        (value <= Self::MAX.0).then_some(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// The code after this one, or `None` once the 4-digit space is used up.
    pub fn succ(self) -> Option<Self> {
        Self::new(self.0.checked_add(1)?)
    }

    fn parse(s: &str) -> Option<Self> {
        if s.len() != CODE_WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok().map(Self)
    }
}

impl fmt::Display for NodeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Link record carried by a node's file name: `<code><title><next>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeName {
    pub code: NodeCode,
    pub title: String,
    pub next: Option<NodeCode>,
}

impl NodeName {
    pub fn encode(&self) -> String {
        encode(self.code, &self.title, self.next)
    }

    /// Split a file name by fixed-width slicing. Returns `None` for names
    /// that are not node files.
    pub fn decode(file_name: &str) -> Option<Self> {
        let len = file_name.len();
        if len <= 2 * CODE_WIDTH
            || !file_name.is_char_boundary(CODE_WIDTH)
            || !file_name.is_char_boundary(len - CODE_WIDTH)
        {
            return None;
        }
        let (code, rest) = file_name.split_at(CODE_WIDTH);
        let (title, next) = rest.split_at(rest.len() - CODE_WIDTH);
        let code = NodeCode::parse(code)?;
        let next = if next == NULL_CODE {
            None
        } else {
            Some(NodeCode::parse(next)?)
        };
        Some(Self {
            code,
            title: title.to_string(),
            next,
        })
    }
}

pub(crate) fn encode(code: NodeCode, title: &str, next: Option<NodeCode>) -> String {
    match next {
        Some(next) => format!("{code}{title}{next}"),
        None => format!("{code}{title}{NULL_CODE}"),
    }
}

/// Titles become part of a file name, so they must be non-empty, free of
/// path separators and short enough to fit.
pub(crate) fn valid_title(title: &str) -> bool {
    !title.is_empty()
        && !title.contains(['/', '\\', '\0'])
        && title.len() + 2 * CODE_WIDTH <= MAX_FILE_NAME
}
