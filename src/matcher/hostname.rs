use regex::Regex;

use crate::error::Result;
use crate::types::HostnameMatch;

/// Compiled hostname patterns of one list.
#[derive(Debug, Clone, Default)]
pub struct HostnamePatterns {
    mode: HostnameMatch,
    patterns: Vec<Regex>,
}

impl HostnamePatterns {
    pub fn new(mode: HostnameMatch) -> Self {
        Self {
            mode,
            patterns: Vec::new(),
        }
    }

    /// Compile every pattern; the first invalid one fails the whole set.
    pub fn compile<S: AsRef<str>>(patterns: &[S], mode: HostnameMatch) -> Result<Self> {
        let mut set = Self::new(mode);
        for pattern in patterns {
            set.push(pattern.as_ref())?;
        }
        Ok(set)
    }

    /// Compile and append one pattern.
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        let regex = match self.mode {
            HostnameMatch::Search => Regex::new(pattern)?,
            HostnameMatch::Full => Regex::new(&format!("^(?:{})$", pattern))?,
        };
        self.patterns.push(regex);
        Ok(())
    }

    pub fn is_match(&self, hostname: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(hostname))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
