/// A run identifier that sorts by start time: `<unix millis>-<random suffix>`.
pub(crate) fn generate_run_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        nanoid::nanoid!(8, &nanoid::alphabet::SAFE)
    )
}
