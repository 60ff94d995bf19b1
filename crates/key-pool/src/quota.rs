//! Quota detection from error messages
//!
//! The generation API does not expose structured quota codes to callers, so
//! failures are classified from the error text. Quota failures rotate to
//! another credential; daily quota failures park the credential until the
//! next reset; anything else is not a credential problem and is surfaced
//! unchanged.

/// Markers of a rate/quota failure in an error message.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "rate_limit",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
];

/// HTTP status of a rate-limited request. Only matched as a standalone token.
const TOO_MANY_REQUESTS_STATUS: &str = "429";

/// Markers that the quota in question is a per-day allowance.
const DAILY_PATTERNS: &[&str] = &["daily", "per day", "perday", "per_day"];

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Quota failure on a daily allowance; recovers at the next reset
    DailyLimit,
    /// Quota/rate failure without a daily marker
    Quota,
    /// Not a credential problem
    Other,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::DailyLimit => "daily_limit",
            FailureKind::Quota => "quota",
            FailureKind::Other => "other",
        }
    }
}

/// Classify an error message. Matching is case-insensitive.
///
/// A daily marker alone is not a quota failure: "daily digest failed" is `Other`.
pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    let quota = QUOTA_PATTERNS.iter().any(|p| lower.contains(p))
        || contains_token(&lower, TOO_MANY_REQUESTS_STATUS);
    if !quota {
        return FailureKind::Other;
    }
    if DAILY_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::DailyLimit
    } else {
        FailureKind::Quota
    }
}

/// Whether `token` occurs in `text` not glued to a word, version, or id.
///
/// "HTTP 429:" and `"code":429` match; "pro-0429", "14290" and "v1.429" do not.
fn contains_token(text: &str, token: &str) -> bool {
    let glued = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    text.match_indices(token).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + token.len()..].chars().next();
        !before.is_some_and(glued) && !after.is_some_and(glued)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_quota_marker_is_quota() {
        for marker in QUOTA_PATTERNS {
            let msg = format!("upstream said: {marker} hit");
            assert_eq!(classify_failure(&msg), FailureKind::Quota, "marker {marker}");
        }
    }

    #[test]
    fn every_daily_marker_with_quota_is_daily() {
        for marker in DAILY_PATTERNS {
            let msg = format!("quota exceeded ({marker} limit)");
            assert_eq!(classify_failure(&msg), FailureKind::DailyLimit, "marker {marker}");
        }
    }

    #[test]
    fn daily_marker_alone_is_other() {
        assert_eq!(classify_failure("daily digest job failed"), FailureKind::Other);
        assert_eq!(classify_failure("runs once per day"), FailureKind::Other);
    }

    #[test]
    fn gemini_per_day_quota_body() {
        let body = r#"upstream returned HTTP 429: {"error":{"code":429,"message":"Quota exceeded for metric: generativelanguage.googleapis.com/generate_content_free_tier_requests, limit: 50, model: gemini-2.5-flash-image","status":"RESOURCE_EXHAUSTED","details":[{"quotaId":"GenerateRequestsPerDayPerProjectPerModel-FreeTier"}]}}"#;
        assert_eq!(classify_failure(body), FailureKind::DailyLimit);
    }

    #[test]
    fn gemini_per_minute_quota_body() {
        let body = r#"upstream returned HTTP 429: {"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[{"quotaId":"GenerateRequestsPerMinutePerProjectPerModel-FreeTier"}]}}"#;
        assert_eq!(classify_failure(body), FailureKind::Quota);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classify_failure("RESOURCE EXHAUSTED"), FailureKind::Quota);
        assert_eq!(classify_failure("Too Many Requests"), FailureKind::Quota);
        assert_eq!(classify_failure("QUOTA exceeded PER DAY"), FailureKind::DailyLimit);
    }

    #[test]
    fn non_quota_errors_are_other() {
        assert_eq!(classify_failure("upstream returned HTTP 400: invalid argument"), FailureKind::Other);
        assert_eq!(classify_failure("transport error: connection refused"), FailureKind::Other);
        assert_eq!(classify_failure("invalid response: prompt blocked: SAFETY"), FailureKind::Other);
        assert_eq!(classify_failure(""), FailureKind::Other);
    }

    #[test]
    fn status_429_token_is_quota() {
        assert_eq!(classify_failure("upstream returned HTTP 429: slow down"), FailureKind::Quota);
        assert_eq!(classify_failure(r#"{"error":{"code":429}}"#), FailureKind::Quota);
        assert_eq!(classify_failure("status 429"), FailureKind::Quota);
        assert_eq!(classify_failure("429"), FailureKind::Quota);
    }

    #[test]
    fn digits_inside_other_tokens_are_not_quota() {
        assert_eq!(
            classify_failure("upstream returned HTTP 400: model gemini-1.0-pro-0429 does not support generateContent"),
            FailureKind::Other
        );
        assert_eq!(
            classify_failure("upstream returned HTTP 400: request 7f3a-14290 invalid argument"),
            FailureKind::Other
        );
        assert_eq!(classify_failure("transport error: connect to 10.0.0.1:14290 refused"), FailureKind::Other);
        assert_eq!(classify_failure("invalid response: schema v1.429 unknown"), FailureKind::Other);
        assert_eq!(classify_failure("request id req_429_x failed"), FailureKind::Other);
    }

    #[test]
    fn labels() {
        assert_eq!(FailureKind::DailyLimit.label(), "daily_limit");
        assert_eq!(FailureKind::Quota.label(), "quota");
        assert_eq!(FailureKind::Other.label(), "other");
    }
}
