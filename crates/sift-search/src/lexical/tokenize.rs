use sift_core::config::Language;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of",
    "on", "or", "our", "she", "so", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who",
    "why", "will", "with", "would", "you", "your",
];

const SPANISH_STOP_WORDS: &[&str] = &[
    "a", "al", "algo", "como", "con", "cual", "cuando", "de", "del", "desde", "donde", "el",
    "ella", "ellos", "en", "entre", "era", "es", "esa", "ese", "eso", "esta", "este", "esto",
    "fue", "ha", "han", "hay", "la", "las", "le", "les", "lo", "los", "mas", "más", "me", "mi",
    "muy", "ni", "no", "nos", "o", "para", "pero", "por", "que", "qué", "se", "sea", "ser", "si",
    "sí", "sin", "sobre", "son", "su", "sus", "también", "te", "tiene", "tu", "un", "una", "uno",
    "y", "ya", "yo",
];

fn stop_words(language: Language) -> &'static [&'static str] {
    match language {
        Language::English => ENGLISH_STOP_WORDS,
        Language::Spanish => SPANISH_STOP_WORDS,
    }
}

/// Splits text into lowercase alphanumeric terms for lexical scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tokenizer {
    language: Language,
    remove_stop_words: bool,
}

impl Tokenizer {
    #[must_use]
    pub const fn new(language: Language, remove_stop_words: bool) -> Self {
        Self {
            language,
            remove_stop_words,
        }
    }

    /// Lowercase, split on anything that is not alphanumeric, drop stop
    /// words (when enabled) and tokens of one character or less.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let stops = stop_words(self.language);

        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() > 1)
            .filter(|token| !(self.remove_stop_words && stops.contains(token)))
            .map(str::to_owned)
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(Language::English, true)
    }
}
