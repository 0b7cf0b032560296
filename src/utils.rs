use crate::errors::{AppError, Result};
use log::info;

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await? {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Parses an episode selection such as `1-3,5, 8`.
///
/// Numbers come back in first-seen order without duplicates.
pub fn parse_episode_list(input: &str) -> Result<Vec<u32>> {
    let invalid = |part: &str| AppError::InvalidInput(format!("'{}' is not an episode number or range", part));
    let mut episodes = Vec::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (
                start.trim().parse::<u32>().map_err(|_| invalid(part))?,
                end.trim().parse::<u32>().map_err(|_| invalid(part))?,
            ),
            None => {
                let number = part.parse::<u32>().map_err(|_| invalid(part))?;
                (number, number)
            }
        };

        if start > end {
            return Err(AppError::InvalidInput(format!("range '{}' is descending", part)));
        }
        for number in start..=end {
            if !episodes.contains(&number) {
                episodes.push(number);
            }
        }
    }

    if episodes.is_empty() {
        return Err(AppError::InvalidInput("no episodes selected".to_string()));
    }
    Ok(episodes)
}
