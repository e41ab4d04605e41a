// In crates/strategies/src/factory.rs

use crate::{ConfidenceScorer, Error, IndicatorScorer, Result, ScorerSettings};

/// Builds the scorer named in `settings.name`.
pub fn create_scorer(settings: &ScorerSettings) -> Result<Box<dyn ConfidenceScorer>> {
    let scorer: Box<dyn ConfidenceScorer> = match settings.name.as_str() {
        "indicator" => Box::new(IndicatorScorer::new(settings.clone())?),
        unknown => return Err(Error::UnknownScorer(unknown.to_string())),
    };
    tracing::info!(scorer = scorer.name(), "Confidence scorer created.");
    Ok(scorer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scorer_is_rejected() {
        let settings = ScorerSettings { name: "oracle".into(), ..ScorerSettings::default() };
        assert!(matches!(create_scorer(&settings), Err(Error::UnknownScorer(_))));
    }

    #[test]
    fn default_settings_build_indicator_scorer() {
        let scorer = create_scorer(&ScorerSettings::default()).unwrap();
        assert_eq!(scorer.name(), "IndicatorScorer");
    }
}
