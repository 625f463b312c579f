use uuid::Uuid;

/// Generate a fresh session identifier.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}
