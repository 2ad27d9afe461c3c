use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// placeholder carried by every bunch dependent template in the configuration
pub const PLACEHOLDER: &str = "__AAG__";

/// Data-taking configuration a submission is made for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Bunch {
    #[value(name = "std", alias = "standard", alias = "StdBunch")]
    Standard,
    #[value(name = "aag", alias = "alternate", alias = "AagBunch")]
    Alternate,
}

/// The kinds of templates a bunch gets substituted into. The alternate bunch
/// spells its marker differently depending on where it ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Dataset,
    Collection,
    OutputDir,
    SubmissionDir,
    StateFile,
    DqmDir,
    BatchName,
}

impl Bunch {
    pub const ALL: [Bunch; 2] = [Bunch::Standard, Bunch::Alternate];

    pub fn substitution(self, template: Template) -> &'static str {
        match (self, template) {
            (Self::Standard, _) => "",
            (Self::Alternate, Template::Dataset | Template::Collection | Template::DqmDir) => "AAG",
            (
                Self::Alternate,
                Template::OutputDir | Template::StateFile | Template::BatchName,
            ) => "_Aag",
            (Self::Alternate, Template::SubmissionDir) => "_AAG",
        }
    }

    pub fn resolve(self, template: Template, value: &str) -> String {
        value.replace(PLACEHOLDER, self.substitution(template))
    }

    /// short label used in log lines and reports
    pub fn label(self) -> &'static str {
        match self {
            Self::Standard => "STD",
            Self::Alternate => "AAG",
        }
    }

    /// calibration mode name understood by the gain computation templates
    pub fn mode(self) -> &'static str {
        match self {
            Self::Standard => "StdBunch",
            Self::Alternate => "AagBunch",
        }
    }

    /// value to hand back on a command line
    pub fn arg(self) -> &'static str {
        match self {
            Self::Standard => "std",
            Self::Alternate => "aag",
        }
    }
}

impl fmt::Display for Bunch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_removes_placeholder() {
        for template in [
            Template::Dataset,
            Template::Collection,
            Template::OutputDir,
            Template::SubmissionDir,
            Template::StateFile,
            Template::DqmDir,
            Template::BatchName,
        ] {
            assert_eq!(Bunch::Standard.resolve(template, "x__AAG__y"), "xy");
        }
    }

    #[test]
    fn alternate_spellings() {
        let bunch = Bunch::Alternate;

        assert_eq!(
            bunch.resolve(
                Template::Dataset,
                "/StreamExpress/Run2024*-SiStripCalMinBias__AAG__-Express-v*/ALCARECO"
            ),
            "/StreamExpress/Run2024*-SiStripCalMinBiasAAG-Express-v*/ALCARECO"
        );
        assert_eq!(bunch.resolve(Template::OutputDir, "GR24__AAG__"), "GR24_Aag");
        assert_eq!(bunch.resolve(Template::BatchName, "CalibTrees__AAG__"), "CalibTrees_Aag");
        assert_eq!(
            bunch.resolve(Template::SubmissionDir, "condor_submission__AAG__"),
            "condor_submission_AAG"
        );
        assert_eq!(
            bunch.resolve(Template::DqmDir, "AlCaReco/SiStripGains__AAG__"),
            "AlCaReco/SiStripGainsAAG"
        );
    }

    #[test]
    fn cli_names() {
        assert_eq!(Bunch::from_str("aag", true), Ok(Bunch::Alternate));
        assert_eq!(Bunch::from_str("StdBunch", true), Ok(Bunch::Standard));
        assert_eq!(Bunch::from_str(Bunch::Alternate.arg(), false), Ok(Bunch::Alternate));
        assert_eq!(Bunch::Alternate.to_string(), "AagBunch");
    }
}
