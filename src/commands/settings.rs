use crate::error::AppError;
use crate::text::CleaningOptions;
use crate::Studio;
use std::collections::HashMap;

/// Get a setting value
pub async fn get_setting(studio: &Studio, key: &str) -> Result<Option<String>, AppError> {
    Ok(studio.db.get_setting(key)?)
}

/// Set a setting value
pub async fn set_setting(studio: &Studio, key: &str, value: &str) -> Result<(), AppError> {
    log::info!("Setting {} = {}", key, value);
    Ok(studio.db.set_setting(key, value)?)
}

pub async fn get_all_settings(studio: &Studio) -> Result<HashMap<String, String>, AppError> {
    Ok(studio.db.get_all_settings()?)
}

/// Cleaning options built from the persisted `clean_*` settings
pub async fn cleaning_options(studio: &Studio) -> Result<CleaningOptions, AppError> {
    Ok(CleaningOptions::from_settings(&studio.db.get_all_settings()?))
}
