//! Core data model types for psytest.
//!
//! These are the authored content types (tests, blocks, scales, questions,
//! answers, weights) plus the session and submission shapes exchanged with
//! the content collaborator. Field names follow the collaborator's camelCase
//! JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type TestId = u64;
pub type BlockId = u64;
pub type ScaleId = u64;
pub type QuestionId = u64;
pub type AnswerId = u64;
pub type UserId = u64;

/// Test metadata. Immutable during delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    #[serde(default)]
    pub id: Option<TestId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A group of questions sharing time limit, randomization and answer mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(deserialize_with = "wire::id")]
    pub id: BlockId,
    #[serde(default)]
    pub name: String,
    /// Position of the block within the test. Lower comes first.
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub has_time_limit: bool,
    /// Time limit in minutes, as authored. See `DeliveryConfig` for the
    /// conversion into timer seconds.
    #[serde(default)]
    pub time_limit: u32,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub randomize_questions: bool,
    #[serde(default)]
    pub randomize_answers: bool,
    #[serde(default)]
    pub questions_type: QuestionsType,
    #[serde(default)]
    pub number_of_answers: u32,
    #[serde(default)]
    pub number_of_questions: u32,
}

/// How many answers a respondent may pick per question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionsType {
    #[default]
    #[serde(rename = "single-choice")]
    SingleChoice,
    #[serde(rename = "multi-choice")]
    MultiChoice,
}

impl fmt::Display for QuestionsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionsType::SingleChoice => write!(f, "single-choice"),
            QuestionsType::MultiChoice => write!(f, "multi-choice"),
        }
    }
}

impl FromStr for QuestionsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single-choice" | "single" => Ok(QuestionsType::SingleChoice),
            "multi-choice" | "multiple-choice" | "multi" => Ok(QuestionsType::MultiChoice),
            other => Err(format!("unknown questions type: {other}")),
        }
    }
}

/// A scored dimension belonging to one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    #[serde(deserialize_with = "wire::id")]
    pub id: ScaleId,
    /// Optional on the wire; calibration falls back to a heuristic when absent.
    #[serde(default)]
    pub scale_type: Option<ScaleType>,
    #[serde(default)]
    pub pole1: String,
    #[serde(default)]
    pub pole2: Option<String>,
    #[serde(deserialize_with = "wire::id")]
    pub block_id: BlockId,
}

/// Aggregation rule of a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    Unipolar,
    Bipolar,
    Gradual,
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleType::Unipolar => write!(f, "unipolar"),
            ScaleType::Bipolar => write!(f, "bipolar"),
            ScaleType::Gradual => write!(f, "gradual"),
        }
    }
}

impl FromStr for ScaleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unipolar" => Ok(ScaleType::Unipolar),
            "bipolar" => Ok(ScaleType::Bipolar),
            "gradual" => Ok(ScaleType::Gradual),
            other => Err(format!("unknown scale type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(deserialize_with = "wire::id")]
    pub id: QuestionId,
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(deserialize_with = "wire::id")]
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    #[serde(deserialize_with = "wire::id")]
    pub id: AnswerId,
    pub text: String,
    #[serde(deserialize_with = "wire::id")]
    pub question_id: QuestionId,
}

/// Signed contribution of one answer toward one scale.
///
/// Weights form a sparse matrix; a missing (scale, answer) cell means 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weight {
    #[serde(alias = "answer_id", deserialize_with = "wire::id")]
    pub answer_id: AnswerId,
    #[serde(alias = "scale_id", deserialize_with = "wire::id")]
    pub scale_id: ScaleId,
    pub value: f64,
}

/// Calibrated mean / standard deviation of a scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Norm {
    #[serde(deserialize_with = "wire::id")]
    pub scale_id: ScaleId,
    pub mean: f64,
    pub std_dev: f64,
    #[serde(rename = "type", default)]
    pub norm_type: String,
}

/// Interpretation text attached to one level of a scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    #[serde(deserialize_with = "wire::id")]
    pub scale_id: ScaleId,
    pub level: u32,
    pub text: String,
}

/// Everything the engine needs to administer and score one test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestBundle {
    pub test: Test,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub scales: Vec<Scale>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub weights: Vec<Weight>,
    #[serde(default)]
    pub norms: Vec<Norm>,
    #[serde(default)]
    pub interpretations: Vec<Interpretation>,
}

/// Identity of a respondent run. Opaque to the engine.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(deserialize_with = "wire::id")]
    pub test_id: TestId,
    #[serde(deserialize_with = "wire::id")]
    pub user_id: UserId,
    #[serde(default)]
    pub email: String,
    pub token: String,
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("test_id", &self.test_id)
            .field("user_id", &self.user_id)
            .field("token", &"***")
            .finish()
    }
}

/// Token status as reported by the collaborator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenStatus {
    #[serde(default)]
    pub used: bool,
}

/// Result payload covering every question of the test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    #[serde(deserialize_with = "wire::id")]
    pub user_id: UserId,
    #[serde(deserialize_with = "wire::id")]
    pub test_id: TestId,
    #[serde(default)]
    pub token: String,
    #[serde(deserialize_with = "wire::answer_map")]
    pub answers: BTreeMap<QuestionId, Vec<AnswerId>>,
}

/// Collaborator response to a saved submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    #[serde(default)]
    pub final_result: serde_json::Value,
}

fn default_true() -> bool {
    true
}

/// Transport-edge id conversion.
///
/// The collaborator and form inputs sometimes carry ids as numeric strings;
/// inside the engine every id is a `u64`.
pub mod wire {
    use std::collections::BTreeMap;
    use std::fmt;

    use serde::de::{self, Deserializer, Visitor};
    use serde::Deserialize;

    struct IdVisitor;

    impl Visitor<'_> for IdVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer id or a numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom(format!("negative id: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id: {v:?}")))
        }
    }

    /// A single id accepted as a number or a numeric string.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WireId(pub u64);

    impl<'de> Deserialize<'de> for WireId {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            d.deserialize_any(IdVisitor).map(WireId)
        }
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        d.deserialize_any(IdVisitor)
    }

    pub fn answer_map<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<u64, Vec<u64>>, D::Error> {
        let raw: BTreeMap<String, Vec<WireId>> = BTreeMap::deserialize(d)?;
        raw.into_iter()
            .map(|(question, answers)| {
                let question = question
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| de::Error::custom(format!("invalid question id: {question:?}")))?;
                Ok((question, answers.into_iter().map(|a| a.0).collect()))
            })
            .collect()
    }
}
