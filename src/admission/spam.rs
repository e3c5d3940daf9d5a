//! Spam content detection.
//!
//! Matches lowercased message text against literal keywords and patterns
//! (bare e-mail addresses, bare URLs) plus three heuristics: more than one
//! `http(s)://` scheme, more than one 8+ digit number, and more than five
//! `!`/`?` characters combined.

use regex::Regex;

/// Literal substrings that mark a message as spam.
pub const SPAM_KEYWORDS: &[&str] = &[
    "spam",
    "publicidad",
    "promo",
    "gana dinero",
    "investment",
    "casino",
    "lottery",
    "premio",
    "ganaste",
    "bitcoin",
    "crypto",
    "prestamo",
    "loan",
];

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const URL_PATTERN: &str = r"(?:https?://)?(?:[\w-]+\.)+[a-zA-Z]{2,}(?:/[^\s]*)?";
const SCHEME_PATTERN: &str = r"https?://";
const LONG_NUMBER_PATTERN: &str = r"\b\d{8,}\b";

const MAX_URL_SCHEMES: usize = 1;
const MAX_LONG_NUMBERS: usize = 1;
const MAX_PUNCTUATION: usize = 5;

/// Why a message was classified as spam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamSignal {
    Keyword(&'static str),
    Email,
    Url,
    MultipleUrls,
    MultiplePhoneNumbers,
    ExcessivePunctuation,
}

impl std::fmt::Display for SpamSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyword(keyword) => write!(f, "keyword `{keyword}`"),
            Self::Email => write!(f, "e-mail address"),
            Self::Url => write!(f, "url"),
            Self::MultipleUrls => write!(f, "multiple urls"),
            Self::MultiplePhoneNumbers => write!(f, "multiple phone numbers"),
            Self::ExcessivePunctuation => write!(f, "excessive punctuation"),
        }
    }
}

/// Compiled spam patterns.
#[derive(Debug, Clone)]
pub struct SpamDetector {
    email: Regex,
    url: Regex,
    scheme: Regex,
    long_number: Regex,
}

impl SpamDetector {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(EMAIL_PATTERN)?,
            url: Regex::new(URL_PATTERN)?,
            scheme: Regex::new(SCHEME_PATTERN)?,
            long_number: Regex::new(LONG_NUMBER_PATTERN)?,
        })
    }

    /// First spam signal found in `text`, if any.
    pub fn detect(&self, text: &str) -> Option<SpamSignal> {
        let text = text.to_lowercase();

        if let Some(keyword) = SPAM_KEYWORDS.iter().find(|k| text.contains(**k)) {
            return Some(SpamSignal::Keyword(keyword));
        }
        if self.email.is_match(&text) {
            return Some(SpamSignal::Email);
        }
        if self.url.is_match(&text) {
            return Some(SpamSignal::Url);
        }
        if self.scheme.find_iter(&text).count() > MAX_URL_SCHEMES {
            return Some(SpamSignal::MultipleUrls);
        }
        if self.long_number.find_iter(&text).count() > MAX_LONG_NUMBERS {
            return Some(SpamSignal::MultiplePhoneNumbers);
        }
        let punctuation = text.chars().filter(|c| matches!(c, '!' | '?')).count();
        if punctuation > MAX_PUNCTUATION {
            return Some(SpamSignal::ExcessivePunctuation);
        }
        None
    }

    pub fn is_spam(&self, text: &str) -> bool {
        self.detect(text).is_some()
    }
}
