use crate::classifier::Classifier;
use crate::error::EmotionError;

/// Runs `text` through the classifier and returns the top-ranked label.
///
/// The classifier is not called when the text is absent or empty.
pub async fn detect_emotion(
    classifier: &dyn Classifier,
    text: Option<&str>,
) -> Result<String, EmotionError> {
    let text = match text {
        Some(text) if !text.is_empty() => text,
        _ => return Err(EmotionError::NoText),
    };

    let ranking = classifier.classify(text).await?;

    ranking
        .into_iter()
        .next()
        .map(|top| top.label)
        .ok_or_else(|| EmotionError::Failure("classifier returned no labels".to_string()))
}
