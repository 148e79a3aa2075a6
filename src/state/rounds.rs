//! Round types, their tunable settings and the scoring formulas applied when an
//! answer is recorded.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::ServiceError;

/// Scoring policy of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RoundType {
    /// Flat points for every correct answer.
    PointBuilder,
    /// Only the first player to buzz in can score.
    FastestFinger,
    /// Points decay with the time taken to answer.
    GraduatedPoints,
    /// Double points when the question matches the player's specialist subject.
    Specialist,
}

impl RoundType {
    /// Every supported round type.
    pub const ALL: [RoundType; 4] = [
        RoundType::PointBuilder,
        RoundType::FastestFinger,
        RoundType::GraduatedPoints,
        RoundType::Specialist,
    ];

    /// Wire name of the round type.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundType::PointBuilder => "point-builder",
            RoundType::FastestFinger => "fastest-finger",
            RoundType::GraduatedPoints => "graduated-points",
            RoundType::Specialist => "specialist",
        }
    }
}

impl fmt::Display for RoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundType {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RoundType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| ServiceError::InvalidRoundType(value.to_string()))
    }
}

/// Caller-supplied overrides merged over the type defaults when a round starts.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RoundSettingsInput {
    /// Points for a correct answer.
    #[validate(range(min = 0, max = 10_000))]
    pub points_per_question: Option<i32>,
    /// Whether wrong answers cost points.
    pub negative_points: Option<bool>,
    /// Fastest-finger penalty for a wrong buzz-in.
    #[validate(range(min = 0, max = 10_000))]
    pub penalty_points: Option<i32>,
    /// Graduated-points ceiling.
    #[validate(range(min = 0, max = 10_000))]
    pub max_points: Option<i32>,
    /// Graduated-points floor.
    #[validate(range(min = 0, max = 10_000))]
    pub min_points: Option<i32>,
    /// Graduated-points lost per second.
    #[validate(range(min = 0.0, max = 1_000.0))]
    pub decrease_rate: Option<f64>,
    /// Per-question time limit.
    #[validate(range(min = 1, max = 3_600))]
    pub time_limit_seconds: Option<u32>,
    /// Time limit for the whole round.
    #[validate(range(min = 1, max = 86_400))]
    pub round_time_limit_seconds: Option<u32>,
    /// Whether an accepted answer may be replaced.
    pub allow_resubmission: Option<bool>,
}

/// Fully resolved settings of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundSettings {
    /// Points for a correct answer (point-builder, fastest-finger, specialist base).
    pub points_per_question: i32,
    /// Whether incorrect answers cost points where the policy allows it.
    pub negative_points: bool,
    /// Points lost for an incorrect fastest-finger buzz-in.
    pub penalty_points: i32,
    /// Graduated-points ceiling.
    pub max_points: i32,
    /// Graduated-points floor.
    pub min_points: i32,
    /// Graduated-points lost per elapsed second.
    pub decrease_rate: f64,
    /// Default per-question time limit.
    pub time_limit_seconds: u32,
    /// Optional limit for the whole round.
    pub round_time_limit_seconds: Option<u32>,
    /// Whether players may replace an accepted answer.
    pub allow_resubmission: bool,
}

impl RoundSettings {
    /// Defaults for a round type.
    pub fn defaults_for(round_type: RoundType, default_time_limit_seconds: u32) -> Self {
        let base = Self {
            points_per_question: 10,
            negative_points: false,
            penalty_points: 0,
            max_points: 0,
            min_points: 0,
            decrease_rate: 0.0,
            time_limit_seconds: default_time_limit_seconds,
            round_time_limit_seconds: None,
            allow_resubmission: false,
        };
        match round_type {
            RoundType::PointBuilder | RoundType::Specialist => base,
            RoundType::FastestFinger => Self {
                penalty_points: 2,
                ..base
            },
            RoundType::GraduatedPoints => Self {
                max_points: 20,
                min_points: 5,
                decrease_rate: 0.5,
                ..base
            },
        }
    }

    /// Merge caller overrides over the type defaults.
    pub fn merged(
        round_type: RoundType,
        default_time_limit_seconds: u32,
        input: &RoundSettingsInput,
    ) -> Result<Self, ServiceError> {
        input.validate()?;
        let defaults = Self::defaults_for(round_type, default_time_limit_seconds);
        let merged = Self {
            points_per_question: input
                .points_per_question
                .unwrap_or(defaults.points_per_question),
            negative_points: input.negative_points.unwrap_or(defaults.negative_points),
            penalty_points: input.penalty_points.unwrap_or(defaults.penalty_points),
            max_points: input.max_points.unwrap_or(defaults.max_points),
            min_points: input.min_points.unwrap_or(defaults.min_points),
            decrease_rate: input.decrease_rate.unwrap_or(defaults.decrease_rate),
            time_limit_seconds: input
                .time_limit_seconds
                .unwrap_or(defaults.time_limit_seconds),
            round_time_limit_seconds: input
                .round_time_limit_seconds
                .or(defaults.round_time_limit_seconds),
            allow_resubmission: input
                .allow_resubmission
                .unwrap_or(defaults.allow_resubmission),
        };

        if merged.min_points > merged.max_points {
            return Err(ServiceError::InvalidInput(format!(
                "minPoints ({}) must not exceed maxPoints ({})",
                merged.min_points, merged.max_points
            )));
        }
        Ok(merged)
    }
}

/// Everything the scoring policy looks at for one submission.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    /// Round policy.
    pub round_type: RoundType,
    /// Resolved round settings.
    pub settings: &'a RoundSettings,
    /// Whether the answer matched the key.
    pub is_correct: bool,
    /// Whether the client reported a timeout.
    pub timed_out: bool,
    /// Time between question start and submission.
    pub elapsed: Duration,
    /// 1-based buzzer position, if the player buzzed for this question.
    pub buzzer_position: Option<usize>,
    /// Category of the question.
    pub question_category: &'a str,
    /// Specialist subject of the answering player.
    pub specialist_subject: Option<&'a str>,
}

/// Point delta for a submission under the round's policy.
///
/// Timed-out submissions never score nor cost points.
pub fn score_submission(input: &ScoringInput<'_>) -> i32 {
    if input.timed_out {
        return 0;
    }
    let settings = input.settings;
    match (input.round_type, input.is_correct) {
        (RoundType::PointBuilder, true) => settings.points_per_question,
        (RoundType::PointBuilder, false) => {
            if settings.negative_points {
                -(settings.points_per_question / 2)
            } else {
                0
            }
        }
        (RoundType::FastestFinger, true) => match input.buzzer_position {
            Some(1) => settings.points_per_question,
            _ => 0,
        },
        // Only a player who actually buzzed in can be penalised.
        (RoundType::FastestFinger, false) => match input.buzzer_position {
            Some(_) => -settings.penalty_points,
            None => 0,
        },
        (RoundType::GraduatedPoints, true) => graduated_points(
            settings.max_points,
            settings.min_points,
            settings.decrease_rate,
            input.elapsed,
        ),
        (RoundType::GraduatedPoints, false) => {
            if settings.negative_points {
                -(settings.min_points / 2)
            } else {
                0
            }
        }
        (RoundType::Specialist, true) => {
            specialist_points(settings, input.question_category, input.specialist_subject)
        }
        (RoundType::Specialist, false) => 0,
    }
}

/// `max(min, max - floor(elapsed * rate))`, non-increasing in `elapsed`.
pub fn graduated_points(max_points: i32, min_points: i32, decrease_rate: f64, elapsed: Duration) -> i32 {
    let decay = (elapsed.as_secs_f64() * decrease_rate).floor();
    let decay = if decay >= i32::MAX as f64 {
        i32::MAX
    } else {
        decay as i32
    };
    max_points.saturating_sub(decay).max(min_points)
}

/// Case-sensitive category match doubles the base points.
pub fn specialist_points(
    settings: &RoundSettings,
    question_category: &str,
    specialist_subject: Option<&str>,
) -> i32 {
    if specialist_subject == Some(question_category) {
        settings.points_per_question * 2
    } else {
        settings.points_per_question
    }
}

/// Points applied by a host grading override when no explicit amount is given.
pub fn default_override_points(
    round_type: RoundType,
    settings: &RoundSettings,
    force_correct: bool,
    question_category: &str,
    specialist_subject: Option<&str>,
) -> i32 {
    match (round_type, force_correct) {
        (RoundType::PointBuilder | RoundType::FastestFinger, true) => settings.points_per_question,
        (RoundType::GraduatedPoints, true) => settings.max_points,
        (RoundType::Specialist, true) => {
            specialist_points(settings, question_category, specialist_subject)
        }
        (RoundType::PointBuilder, false) if settings.negative_points => {
            -(settings.points_per_question / 2)
        }
        (RoundType::GraduatedPoints, false) if settings.negative_points => {
            -(settings.min_points / 2)
        }
        (RoundType::FastestFinger, false) => -settings.penalty_points,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(round_type: RoundType, settings: &'a RoundSettings) -> ScoringInput<'a> {
        ScoringInput {
            round_type,
            settings,
            is_correct: true,
            timed_out: false,
            elapsed: Duration::ZERO,
            buzzer_position: None,
            question_category: "History",
            specialist_subject: None,
        }
    }

    #[test]
    fn unknown_round_type_is_rejected() {
        let err = "lightning".parse::<RoundType>().unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRoundType(name) if name == "lightning"));
        assert_eq!(
            "graduated-points".parse::<RoundType>().unwrap(),
            RoundType::GraduatedPoints
        );
    }

    #[test]
    fn overrides_are_merged_over_type_defaults() {
        let merged = RoundSettings::merged(
            RoundType::FastestFinger,
            30,
            &RoundSettingsInput {
                points_per_question: Some(25),
                ..RoundSettingsInput::default()
            },
        )
        .unwrap();
        assert_eq!(merged.points_per_question, 25);
        assert_eq!(merged.penalty_points, 2);
        assert_eq!(merged.time_limit_seconds, 30);
    }

    #[test]
    fn inverted_graduated_bounds_are_invalid() {
        let err = RoundSettings::merged(
            RoundType::GraduatedPoints,
            30,
            &RoundSettingsInput {
                min_points: Some(30),
                ..RoundSettingsInput::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn graduated_points_decay_and_clamp() {
        assert_eq!(graduated_points(20, 5, 0.5, Duration::from_secs(10)), 15);
        assert_eq!(graduated_points(20, 5, 0.5, Duration::from_secs(40)), 5);
        assert_eq!(graduated_points(20, 5, 0.5, Duration::ZERO), 20);

        let mut previous = i32::MAX;
        for millis in (0..60_000).step_by(250) {
            let points = graduated_points(20, 5, 0.5, Duration::from_millis(millis));
            assert!(points <= previous, "points increased at {millis}ms");
            previous = points;
        }
    }

    #[test]
    fn point_builder_penalty_only_with_negative_points() {
        let mut settings = RoundSettings::defaults_for(RoundType::PointBuilder, 30);
        let wrong = ScoringInput {
            is_correct: false,
            ..input(RoundType::PointBuilder, &settings)
        };
        assert_eq!(score_submission(&wrong), 0);

        settings.negative_points = true;
        settings.points_per_question = 15;
        let wrong = ScoringInput {
            is_correct: false,
            ..input(RoundType::PointBuilder, &settings)
        };
        assert_eq!(score_submission(&wrong), -7);
    }

    #[test]
    fn fastest_finger_rewards_only_the_first_buzz() {
        let settings = RoundSettings::defaults_for(RoundType::FastestFinger, 30);
        let first = ScoringInput {
            buzzer_position: Some(1),
            ..input(RoundType::FastestFinger, &settings)
        };
        let second = ScoringInput {
            buzzer_position: Some(2),
            ..input(RoundType::FastestFinger, &settings)
        };
        let wrong_buzz = ScoringInput {
            buzzer_position: Some(2),
            is_correct: false,
            ..input(RoundType::FastestFinger, &settings)
        };
        assert_eq!(score_submission(&first), 10);
        assert_eq!(score_submission(&second), 0);
        assert_eq!(score_submission(&wrong_buzz), -2);
    }

    #[test]
    fn specialist_match_is_case_sensitive() {
        let settings = RoundSettings::defaults_for(RoundType::Specialist, 30);
        let matching = ScoringInput {
            specialist_subject: Some("History"),
            ..input(RoundType::Specialist, &settings)
        };
        let other_case = ScoringInput {
            specialist_subject: Some("history"),
            ..input(RoundType::Specialist, &settings)
        };
        assert_eq!(score_submission(&matching), 20);
        assert_eq!(score_submission(&other_case), 10);
    }

    #[test]
    fn timed_out_submissions_score_nothing() {
        let mut settings = RoundSettings::defaults_for(RoundType::PointBuilder, 30);
        settings.negative_points = true;
        let timed_out = ScoringInput {
            is_correct: false,
            timed_out: true,
            ..input(RoundType::PointBuilder, &settings)
        };
        assert_eq!(score_submission(&timed_out), 0);
    }
}
