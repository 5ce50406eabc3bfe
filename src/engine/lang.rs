use clap::ValueEnum;
use serde::Deserialize;

/// Answer language. The library serves Korean readers first, so `Ko` is the
/// default; `Auto` lets the model mirror the language of the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Ko,
    En,
    Auto,
}

impl Lang {
    /// Instruction appended to the question so a single assistant can serve
    /// every language without per-language reconfiguration.
    pub fn question_suffix(self) -> Option<&'static str> {
        match self {
            Lang::Ko => Some("\n\n(답변은 한국어로 작성해 주세요.)"),
            Lang::En => Some("\n\n(Please answer in English.)"),
            Lang::Auto => None,
        }
    }

    /// Whether author names in the answer should be rewritten into their
    /// Korean display forms.
    pub fn localizes_authors(self) -> bool {
        matches!(self, Lang::Ko)
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Lang::Ko => "ko",
            Lang::En => "en",
            Lang::Auto => "auto",
        })
    }
}
