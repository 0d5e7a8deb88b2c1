//! # Phonetic Transcriber
//!
//! Converts reference text into stress-marked ARPAbet using the CMU
//! Pronouncing Dictionary. Words the dictionary does not know fall back to a
//! small spelling-to-sound rule table so every word still yields phonemes.
//!
//! ## Determinism:
//! The transcription of a sentence is exactly the concatenation of the
//! transcriptions of its whitespace-separated words. The word mapper relies on
//! this to split sentence scores back into words.

use crate::scoring::CoarsePhoneme;
use anyhow::{anyhow, bail, Context, Result};
use cmudict_fast::Cmudict;
use std::path::Path;
use tracing::{debug, info};

/// Text → ordered coarse phonemes.
///
/// Implementations must be deterministic and cheap enough to call once per
/// word as well as once per sentence.
pub trait PhoneticTranscriber: Send + Sync {
    fn transcribe(&self, text: &str) -> Vec<CoarsePhoneme>;
}

/// Dictionary-backed transcriber.
pub struct CmuDictTranscriber {
    dictionary: Cmudict,
}

impl CmuDictTranscriber {
    /// Load the dictionary from a `cmudict.dict` file.
    ///
    /// A missing or unreadable dictionary is a startup failure; the service
    /// does not run without it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!(
                "CMU pronouncing dictionary not found at {}. Download cmudict.dict from \
                 https://github.com/cmusphinx/cmudict or set models.cmudict_url",
                path.display()
            );
        }
        let dictionary = Cmudict::new(path).map_err(|e| {
            anyhow!("Failed to load CMU pronouncing dictionary from {}: {}", path.display(), e)
        })?;
        info!("Loaded CMU pronouncing dictionary from {}", path.display());
        Ok(Self { dictionary })
    }

    /// Load the dictionary, first downloading it from `url` when `path` does
    /// not exist yet. An empty `url` means a local copy is required.
    pub async fn load_or_fetch(path: impl AsRef<Path>, url: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() && !url.is_empty() {
            fetch_dictionary(path, url).await?;
        }
        Self::load(path)
    }

    fn transcribe_word(&self, word: &str) -> Vec<CoarsePhoneme> {
        if let Some(rule) = self.dictionary.get(word).and_then(|rules| rules.first()) {
            return rule
                .pronunciation()
                .iter()
                .map(|symbol| CoarsePhoneme::new(symbol.to_string()))
                .collect();
        }

        debug!(word, "Word not in dictionary, using spelling rules");
        spell_out(word)
    }
}

impl PhoneticTranscriber for CmuDictTranscriber {
    fn transcribe(&self, text: &str) -> Vec<CoarsePhoneme> {
        words(text)
            .flat_map(|word| self.transcribe_word(&word))
            .collect()
    }
}

async fn fetch_dictionary(path: &Path, url: &str) -> Result<()> {
    info!("Downloading CMU pronouncing dictionary from {}...", url);
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to download CMU pronouncing dictionary from {}", url))?;
    if !response.status().is_success() {
        bail!("Downloading CMU pronouncing dictionary from {} returned {}", url, response.status());
    }
    let body = response.bytes().await?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &body)
        .await
        .with_context(|| format!("Failed to save CMU pronouncing dictionary to {}", path.display()))?;
    info!("Saved {} bytes of dictionary to {}", body.len(), path.display());
    Ok(())
}

/// Lower-cased dictionary lookup keys for every word in `text`.
///
/// Surrounding punctuation is stripped and hyphenated compounds are split.
/// Tokens made only of punctuation disappear.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .flat_map(|token| token.split('-'))
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .trim_matches('\'')
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
}

/// Spelling rules, longest match first.
const DIGRAPHS: [(&str, &[&str]); 18] = [
    ("ch", &["CH"]),
    ("sh", &["SH"]),
    ("th", &["TH"]),
    ("ph", &["F"]),
    ("ng", &["NG"]),
    ("ck", &["K"]),
    ("wh", &["W"]),
    ("qu", &["K", "W"]),
    ("ee", &["IY1"]),
    ("ea", &["IY1"]),
    ("oo", &["UW1"]),
    ("ai", &["EY1"]),
    ("ay", &["EY1"]),
    ("oa", &["OW1"]),
    ("ow", &["OW1"]),
    ("ou", &["AW1"]),
    ("oi", &["OY1"]),
    ("oy", &["OY1"]),
];

fn letter(c: char) -> &'static [&'static str] {
    match c {
        'a' => &["AE1"],
        'b' => &["B"],
        'c' | 'k' | 'q' => &["K"],
        'd' => &["D"],
        'e' => &["EH1"],
        'f' => &["F"],
        'g' => &["G"],
        'h' => &["HH"],
        'i' => &["IH1"],
        'j' => &["JH"],
        'l' => &["L"],
        'm' => &["M"],
        'n' => &["N"],
        'o' => &["AA1"],
        'p' => &["P"],
        'r' => &["R"],
        's' => &["S"],
        't' => &["T"],
        'u' => &["AH1"],
        'v' => &["V"],
        'w' => &["W"],
        'x' => &["K", "S"],
        'y' => &["Y"],
        'z' => &["Z"],
        _ => &[],
    }
}

fn spell_out(word: &str) -> Vec<CoarsePhoneme> {
    let chars: Vec<char> = word.chars().collect();
    let mut phonemes = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        if let Some((_, symbols)) = DIGRAPHS.iter().find(|(digraph, _)| *digraph == pair) {
            phonemes.extend(symbols.iter().map(|s| CoarsePhoneme::new(s)));
            i += 2;
            continue;
        }
        // A doubled consonant is one sound.
        if i > 0 && chars[i] == chars[i - 1] && !"aeiou".contains(chars[i]) {
            i += 1;
            continue;
        }
        phonemes.extend(letter(chars[i]).iter().map(|s| CoarsePhoneme::new(s)));
        i += 1;
    }

    phonemes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn symbols(phonemes: &[CoarsePhoneme]) -> Vec<&str> {
        phonemes.iter().map(CoarsePhoneme::as_str).collect()
    }

    fn dictionary() -> (tempfile::NamedTempFile, CmuDictTranscriber) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat K AE1 T").unwrap();
        writeln!(file, "the DH AH0").unwrap();
        writeln!(file, "sat S AE1 T").unwrap();
        writeln!(file, "don't D OW1 N T").unwrap();
        file.flush().unwrap();
        let transcriber = CmuDictTranscriber::load(file.path()).unwrap();
        (file, transcriber)
    }

    #[test]
    fn test_words_strip_punctuation() {
        let found: Vec<String> = words("The cat, sat! ... \"Don't\" well-known").collect();
        assert_eq!(found, vec!["the", "cat", "sat", "don't", "well", "known"]);
    }

    #[test]
    fn test_dictionary_lookup() {
        let (_file, transcriber) = dictionary();
        let phonemes = transcriber.transcribe("The cat sat.");
        assert_eq!(symbols(&phonemes), vec!["DH", "AH0", "K", "AE1", "T", "S", "AE1", "T"]);
    }

    #[test]
    fn test_sentence_is_concatenation_of_words() {
        let (_file, transcriber) = dictionary();
        let sentence = "the cat don't zork";
        let whole = transcriber.transcribe(sentence);
        let pieces: Vec<CoarsePhoneme> = sentence
            .split_whitespace()
            .flat_map(|w| transcriber.transcribe(w))
            .collect();
        assert_eq!(whole, pieces);
    }

    #[test]
    fn test_unknown_word_uses_spelling_rules() {
        let (_file, transcriber) = dictionary();
        let phonemes = transcriber.transcribe("shock");
        assert_eq!(symbols(&phonemes), vec!["SH", "AA1", "K"]);
    }

    #[test]
    fn test_spell_out_collapses_doubles() {
        assert_eq!(symbols(&spell_out("bell")), vec!["B", "EH1", "L"]);
        assert_eq!(symbols(&spell_out("box")), vec!["B", "AA1", "K", "S"]);
    }

    #[test]
    fn test_missing_dictionary_fails() {
        let err = CmuDictTranscriber::load("/nonexistent/cmudict.dict").err().unwrap();
        assert!(err.to_string().contains("cmusphinx/cmudict"));
    }

    #[tokio::test]
    async fn test_missing_dictionary_is_downloaded() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cmudict.dict"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cat K AE1 T\n"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dict").join("cmudict.dict");
        let url = format!("{}/cmudict.dict", server.uri());

        let transcriber = CmuDictTranscriber::load_or_fetch(&target, &url).await.unwrap();
        assert!(target.exists());
        assert_eq!(symbols(&transcriber.transcribe("cat")), vec!["K", "AE1", "T"]);

        // A second start reuses the saved copy.
        CmuDictTranscriber::load_or_fetch(&target, &url).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_download_is_a_startup_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cmudict.dict");
        let url = format!("{}/cmudict.dict", server.uri());
        assert!(CmuDictTranscriber::load_or_fetch(&target, &url).await.is_err());
        assert!(!target.exists());
    }
}
