//! Multiple-choice quiz generation.
//!
//! A quiz request is an ordinary question to the [`AnswerService`]: the
//! instruction and source text go in as the question, so the exchange is
//! grounded in the indexed document and recorded in the conversation like
//! any other turn. The only difference is the reply budget, which comes
//! from `llm.quiz_max_tokens` since a JSON quiz is far longer than an
//! answer. The answer prompt's word limit still applies, and models that
//! honor it strictly return short quizzes.
//!
//! Model output is untrusted. [`parse_quiz`] locates the outermost JSON
//! object in the reply, and each question record must pass
//! [`validate_question`] or it is discarded and counted.

use serde::Serialize;
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};
use crate::service::AnswerService;

pub const DEFAULT_QUESTION_COUNT: usize = 5;
pub const MAX_QUESTION_COUNT: usize = 20;

const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quiz {
    pub questions: Vec<QuizQuestion>,
    /// Records in the model output that failed validation.
    pub discarded: usize,
}

/// Ask the model for `count` questions about `text` and keep the valid ones.
pub async fn generate(service: &AnswerService, text: &str, count: usize) -> PipelineResult<Quiz> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PipelineError::InvalidRequest(
            "no text provided for the quiz".to_string(),
        ));
    }
    if !(1..=MAX_QUESTION_COUNT).contains(&count) {
        return Err(PipelineError::InvalidRequest(format!(
            "question count must be between 1 and {}, got {}",
            MAX_QUESTION_COUNT, count
        )));
    }

    let reply = service
        .answer_with_limit(
            &quiz_prompt(text, count),
            None,
            service.options().quiz_max_tokens,
        )
        .await?;
    let quiz = parse_quiz(&reply)?;

    if quiz.discarded > 0 {
        tracing::warn!(
            kept = quiz.questions.len(),
            discarded = quiz.discarded,
            "discarded malformed quiz questions"
        );
    }
    Ok(quiz)
}

/// Instruction asking for exactly `count` questions in a fixed JSON shape.
pub fn quiz_prompt(text: &str, count: usize) -> String {
    format!(
        "You are a quiz generator. Generate exactly {count} multiple-choice questions \
         from the text below.\n\
         Return ONLY JSON in this format:\n\
         {{\"questions\": [{{\"question_text\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \
         \"correct_answer\": \"A\"}}]}}\n\n\
         Text:\n{text}"
    )
}

/// Extract and validate a quiz from raw model output.
///
/// Output with no JSON object, or whose object has no `questions` array, is
/// a generation failure. Individual bad records are only discarded.
pub fn parse_quiz(reply: &str) -> PipelineResult<Quiz> {
    let json = outermost_object(reply).ok_or_else(|| {
        PipelineError::GenerationFailure("model reply contains no JSON object".to_string())
    })?;

    let value: Value = serde_json::from_str(json).map_err(|e| {
        PipelineError::GenerationFailure(format!("model reply is not valid JSON: {}", e))
    })?;

    let records = value
        .get("questions")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PipelineError::GenerationFailure(
                "model reply has no \"questions\" array".to_string(),
            )
        })?;

    let mut questions = Vec::with_capacity(records.len());
    let mut discarded = 0;
    for record in records {
        match validate_question(record) {
            Some(q) => questions.push(q),
            None => discarded += 1,
        }
    }

    Ok(Quiz {
        questions,
        discarded,
    })
}

/// Accept a record only if it has a non-empty question, 2 to 4 string
/// options, and a correct answer that is one of the options.
pub fn validate_question(record: &Value) -> Option<QuizQuestion> {
    let question_text = record.get("question_text")?.as_str()?.trim();
    if question_text.is_empty() {
        return None;
    }

    let options = record
        .get("options")?
        .as_array()?
        .iter()
        .map(|o| o.as_str().map(|s| s.trim().to_string()))
        .collect::<Option<Vec<String>>>()?;
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        return None;
    }

    let correct_answer = record.get("correct_answer")?.as_str()?.trim();
    if !options.iter().any(|o| o == correct_answer) {
        return None;
    }

    Some(QuizQuestion {
        question_text: question_text.to_string(),
        options,
        correct_answer: correct_answer.to_string(),
    })
}

/// Span from the first `{` to the last `}`.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_wrapped_in_prose() {
        let reply = r#"Sure! Here is your quiz:
```json
{"questions": [
  {"question_text": "Capital of France?", "options": ["Paris", "Lyon", "Nice", "Lille"], "correct_answer": "Paris"}
]}
```
Good luck."#;
        let quiz = parse_quiz(reply).unwrap();
        assert_eq!(quiz.discarded, 0);
        assert_eq!(quiz.questions.len(), 1);
        assert_eq!(quiz.questions[0].correct_answer, "Paris");
    }

    #[test]
    fn bad_records_are_discarded_and_counted() {
        let reply = json!({
            "questions": [
                {"question_text": "ok?", "options": ["yes", "no"], "correct_answer": "yes"},
                {"question_text": "", "options": ["a", "b"], "correct_answer": "a"},
                {"question_text": "one option", "options": ["a"], "correct_answer": "a"},
                {"question_text": "five", "options": ["a", "b", "c", "d", "e"], "correct_answer": "a"},
                {"question_text": "answer missing", "options": ["a", "b"], "correct_answer": "c"},
                {"question_text": "numbers", "options": [1, 2], "correct_answer": "1"},
                {"options": ["a", "b"], "correct_answer": "a"},
                "not an object"
            ]
        })
        .to_string();
        let quiz = parse_quiz(&reply).unwrap();
        assert_eq!(quiz.questions.len(), 1);
        assert_eq!(quiz.discarded, 7);
    }

    #[test]
    fn reply_without_quiz_json_is_generation_failure() {
        for reply in [
            "I don't know.",
            "{not json}",
            r#"{"items": []}"#,
            "} backwards {",
        ] {
            let err = parse_quiz(reply).unwrap_err();
            assert_eq!(err.code(), "generation_failure", "reply: {}", reply);
        }
    }

    #[test]
    fn empty_questions_array_is_an_empty_quiz() {
        let quiz = parse_quiz(r#"{"questions": []}"#).unwrap();
        assert!(quiz.questions.is_empty());
        assert_eq!(quiz.discarded, 0);
    }

    #[test]
    fn prompt_names_count_and_text() {
        let prompt = quiz_prompt("Photosynthesis makes sugar.", 3);
        assert!(prompt.contains("exactly 3 multiple-choice"));
        assert!(prompt.contains("\"correct_answer\""));
        assert!(prompt.ends_with("Text:\nPhotosynthesis makes sugar."));
    }
}
