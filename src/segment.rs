//! Separator-based segmentation of a scanned batch.
//!
//! The first page's barcode is the separator token. Every later page carrying
//! the same value marks a boundary and is dropped; the runs of pages between
//! boundaries become segments.

use std::fmt;

/// Separator token for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Separator {
    /// Barcode read from page 1.
    Detected(String),
    /// Page 1 carried no barcode; no page is ever treated as a separator.
    Absent,
}

impl Separator {
    /// Separator from the first page's barcode.
    pub fn from_first_page(barcode: Option<String>) -> Self {
        match barcode {
            Some(value) if !value.trim().is_empty() => Separator::Detected(value),
            _ => Separator::Absent,
        }
    }

    /// Whether a page with this barcode is a separator page.
    pub fn matches(&self, barcode: Option<&str>) -> bool {
        match (self, barcode) {
            (Separator::Detected(token), Some(value)) => token == value,
            _ => false,
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, Separator::Detected(_))
    }

    /// Code stored on groups: the token, or `absent_code` when none was found.
    pub fn code<'a>(&'a self, absent_code: &'a str) -> &'a str {
        match self {
            Separator::Detected(token) => token,
            Separator::Absent => absent_code,
        }
    }
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Separator::Detected(token) => write!(f, "{}", token),
            Separator::Absent => write!(f, "<none>"),
        }
    }
}

/// A maximal run of consecutive non-separator pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pages: Vec<u32>,
}

impl Segment {
    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn first_page(&self) -> u32 {
        self.pages[0]
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Result of segmenting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    pub separator: Separator,
    pub segments: Vec<Segment>,
}

impl Segmentation {
    pub fn page_lists(&self) -> Vec<Vec<u32>> {
        self.segments.iter().map(|s| s.pages.clone()).collect()
    }
}

/// Split pages `1..=page_count` into segments using `barcode_of`.
///
/// `barcode_of` is called once per page in ascending order; page 1 is read
/// first to pick the separator. An empty document yields no segments and no
/// calls.
pub fn segment_pages<F>(page_count: u32, mut barcode_of: F) -> Segmentation
where
    F: FnMut(u32) -> Option<String>,
{
    if page_count == 0 {
        return Segmentation {
            separator: Separator::Absent,
            segments: Vec::new(),
        };
    }

    let first = barcode_of(1);
    let separator = Separator::from_first_page(first.clone());

    let mut segments = Vec::new();
    let mut current: Vec<u32> = Vec::new();

    for page in 1..=page_count {
        let barcode = if page == 1 { first.clone() } else { barcode_of(page) };
        if separator.matches(barcode.as_deref()) {
            if !current.is_empty() {
                segments.push(Segment {
                    pages: std::mem::take(&mut current),
                });
            }
        } else {
            current.push(page);
        }
    }
    if !current.is_empty() {
        segments.push(Segment { pages: current });
    }

    Segmentation {
        separator,
        segments,
    }
}
