use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency for every route.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Collapses dynamic path segments (user ids, team names, prediction uuids)
/// into placeholders so metric label cardinality stays bounded. Everything
/// after a known dynamic marker is treated as a parameter.
fn normalize_path(path: &str) -> String {
    // Route prefixes whose remaining segments are all parameters.
    const DYNAMIC_AFTER: &[&str] = &[
        "/api/v1/users",
        "/api/v1/quiz/progress",
        "/api/v1/quiz/generate",
        "/api/v1/quiz/reset-pool",
        "/api/v1/predictions/history",
        "/api/v1/predictions/stats",
    ];

    for prefix in DYNAMIC_AFTER {
        if let Some(rest) = path.strip_prefix(prefix) {
            if rest.starts_with('/') {
                let params = rest.trim_start_matches('/').split('/').count();
                let placeholders = vec!["{param}"; params].join("/");
                return format!("{}/{}", prefix, placeholders);
            }
        }
    }

    path.split('/')
        .map(|segment| {
            if is_uuid_like(segment) || is_numeric_id(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_user_and_team_segments() {
        assert_eq!(
            normalize_path("/api/v1/quiz/generate/user-42/Arsenal/Easy"),
            "/api/v1/quiz/generate/{param}/{param}/{param}"
        );
        assert_eq!(
            normalize_path("/api/v1/quiz/progress/user-42/Los%20Angeles%20Lakers"),
            "/api/v1/quiz/progress/{param}/{param}"
        );
        assert_eq!(normalize_path("/api/v1/users/12345"), "/api/v1/users/{param}");
    }

    #[test]
    fn static_routes_pass_through() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("/api/v1/quiz/submit"), "/api/v1/quiz/submit");
        assert_eq!(
            normalize_path("/api/v1/teams/available"),
            "/api/v1/teams/available"
        );
    }

    #[test]
    fn uuid_and_numeric_fallback_still_applies() {
        assert_eq!(
            normalize_path("/api/v1/other/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/other/{id}"
        );
        assert_eq!(normalize_path("/api/v1/other/123"), "/api/v1/other/{id}");
    }
}
