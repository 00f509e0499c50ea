//! Phonetic sort/search keys for display text.
//!
//! [`TextIndexSequence::build`] turns arbitrary text into a sequence of
//! [`TextChunk`]s. Transliterable characters (Han ideographs via their
//! pinyin reading, kana via romaji) become one syllable chunk each, carrying
//! an explicit tone digit. Everything else is kept verbatim, with consecutive
//! non-transliterable characters merged into a single chunk.
//!
//! ```text
//! "中文 Docs"  →  [zhong1] [wen2] [" Docs"]
//! "の Alpha"   →  [no5] [" Alpha"]
//! ```
//!
//! Sequences compare chunk-by-chunk on the case-folded text first, then on
//! the chunk kind (verbatim before syllable), then on the tone. A verbatim
//! `"no"` therefore never equals a transliterated `no5`, and text made only
//! of verbatim characters orders exactly like a case-insensitive string
//! comparison.

use pinyin::ToPinyin;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Tone used when the reading carries none (light/neutral tone).
pub const NEUTRAL_TONE: u8 = 5;

/// One unit of a [`TextIndexSequence`].
#[derive(Debug, Clone)]
pub enum TextChunk {
    /// A transliterated syllable such as `zhong` with tone `1`.
    Syllable { text: String, tone: u8 },
    /// A run of characters that have no phonetic reading.
    Verbatim(String),
}

impl TextChunk {
    pub fn text(&self) -> &str {
        match self {
            TextChunk::Syllable { text, .. } => text,
            TextChunk::Verbatim(text) => text,
        }
    }

    pub fn is_transliterated(&self) -> bool {
        matches!(self, TextChunk::Syllable { .. })
    }

    fn tone(&self) -> u8 {
        match self {
            TextChunk::Syllable { tone, .. } => *tone,
            TextChunk::Verbatim(_) => 0,
        }
    }

    fn sort_key(&self) -> (String, bool, u8) {
        (
            self.text().to_lowercase(),
            self.is_transliterated(),
            self.tone(),
        )
    }
}

impl fmt::Display for TextChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextChunk::Syllable { text, tone } => write!(f, "{}{}", text, tone),
            TextChunk::Verbatim(text) => f.write_str(text),
        }
    }
}

impl PartialEq for TextChunk {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TextChunk {}

impl PartialOrd for TextChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TextChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Ordered chunk sequence used as the canonical sort key of a display string.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TextIndexSequence {
    chunks: Vec<TextChunk>,
}

impl TextIndexSequence {
    /// Build the key for `text`.
    ///
    /// The input is first segmented into runs of transliterable and
    /// non-transliterable characters. Transliterable runs expand to one
    /// syllable per character; the others become a single verbatim chunk.
    pub fn build(text: &str) -> Self {
        let mut chunks = Vec::new();
        let mut verbatim = String::new();

        for c in text.chars() {
            match transliterate(c) {
                Some(chunk) => {
                    if !verbatim.is_empty() {
                        chunks.push(TextChunk::Verbatim(std::mem::take(&mut verbatim)));
                    }
                    chunks.push(chunk);
                }
                None => verbatim.push(c),
            }
        }
        if !verbatim.is_empty() {
            chunks.push(TextChunk::Verbatim(verbatim));
        }

        Self { chunks }
    }

    pub fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk texts concatenated without tones or separators
    /// (`"中文"` → `"zhongwen"`), used as an extra fuzzy-search corpus.
    pub fn plain(&self) -> String {
        self.chunks.iter().map(TextChunk::text).collect()
    }
}

impl fmt::Display for TextIndexSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", chunk)?;
        }
        Ok(())
    }
}

impl FromIterator<TextChunk> for TextIndexSequence {
    fn from_iter<I: IntoIterator<Item = TextChunk>>(iter: I) -> Self {
        Self {
            chunks: iter.into_iter().collect(),
        }
    }
}

/// Display text paired with its lazily built, memoized index key.
///
/// Equality and serialization only consider the text; the key is a derived
/// property that is built once and shared by every clone.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct IndexedText {
    text: String,
    key: OnceLock<Arc<TextIndexSequence>>,
}

impl IndexedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            key: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn key(&self) -> &TextIndexSequence {
        self.key
            .get_or_init(|| Arc::new(TextIndexSequence::build(&self.text)))
    }

    /// Case-folded form of the display text.
    pub fn folded(&self) -> String {
        self.text.to_lowercase()
    }
}

impl fmt::Debug for IndexedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.text, f)
    }
}

impl fmt::Display for IndexedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.text)
    }
}

impl PartialEq for IndexedText {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for IndexedText {}

impl From<String> for IndexedText {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for IndexedText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<IndexedText> for String {
    fn from(text: IndexedText) -> Self {
        text.text
    }
}

fn transliterate(c: char) -> Option<TextChunk> {
    if let Some(reading) = c.to_pinyin() {
        return Some(syllable_from_reading(reading.with_tone_num_end()));
    }
    kana_romaji(c).map(|text| TextChunk::Syllable {
        text: text.to_string(),
        tone: NEUTRAL_TONE,
    })
}

/// Split a `"zhong1"`-style reading into syllable and tone.
fn syllable_from_reading(reading: &str) -> TextChunk {
    match reading.char_indices().last() {
        Some((idx, last)) if last.is_ascii_digit() => TextChunk::Syllable {
            text: reading[..idx].to_string(),
            tone: last.to_digit(10).map(|d| d as u8).unwrap_or(NEUTRAL_TONE),
        },
        _ => TextChunk::Syllable {
            text: reading.to_string(),
            tone: NEUTRAL_TONE,
        },
    }
}

const HIRAGANA_START: u32 = 0x3041;
const KATAKANA_START: u32 = 0x30A1;

// U+3041 ..= U+3096
const KANA_ROMAJI: [&str; 86] = [
    "a", "a", "i", "i", "u", "u", "e", "e", "o", "o", //
    "ka", "ga", "ki", "gi", "ku", "gu", "ke", "ge", "ko", "go", //
    "sa", "za", "shi", "ji", "su", "zu", "se", "ze", "so", "zo", //
    "ta", "da", "chi", "ji", "tsu", "tsu", "zu", "te", "de", "to", "do", //
    "na", "ni", "nu", "ne", "no", //
    "ha", "ba", "pa", "hi", "bi", "pi", "fu", "bu", "pu", "he", "be", "pe", "ho", "bo", "po", //
    "ma", "mi", "mu", "me", "mo", //
    "ya", "ya", "yu", "yu", "yo", "yo", //
    "ra", "ri", "ru", "re", "ro", //
    "wa", "wa", "wi", "we", "wo", "n", "vu", "ka", "ke",
];

fn kana_romaji(c: char) -> Option<&'static str> {
    let code = c as u32;
    let offset = if (HIRAGANA_START..HIRAGANA_START + KANA_ROMAJI.len() as u32).contains(&code) {
        code - HIRAGANA_START
    } else if (KATAKANA_START..KATAKANA_START + KANA_ROMAJI.len() as u32).contains(&code) {
        code - KATAKANA_START
    } else {
        return None;
    };
    KANA_ROMAJI.get(offset as usize).copied()
}
