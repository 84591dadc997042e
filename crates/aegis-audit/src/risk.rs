/// Risk score applied when an event is recorded without one.
pub fn default_risk_score(action: &str) -> Option<u8> {
    let score = match action {
        "token.reused" => 90,
        "tenant.mismatch" => 80,
        "session.revoked.family" => 70,
        "login.locked" => 60,
        "session.revoked.user" => 50,
        "rate_limit.exceeded" => 40,
        "login.failed" => 30,
        "job.dead_lettered" => 20,
        "session.revoked" | "session.created" | "session.refreshed" => 10,
        _ => return None,
    };
    Some(score)
}
