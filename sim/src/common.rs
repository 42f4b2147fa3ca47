//! Shared helpers for the simulation CLI: logger setup and input/output path handling.

use std::error::Error;
use std::path::{Path, PathBuf};

/// Initialize the global logger.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to a log file; logs go to stderr when `None`
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = parse_log_level(log_level);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Parse a log level, falling back to `info` for anything unrecognized.
fn parse_log_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{log_level}', defaulting to 'info'");
        log::LevelFilter::Info
    })
}

/// Check that the input path exists and is a file or a directory.
pub fn validate_input_path(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_file() && !input.is_dir() {
        return Err(format!(
            "Input path '{}' is neither a file nor a directory.",
            input.display()
        )
        .into());
    }
    Ok(())
}

/// Trajectory logs to process: the file itself, or every `.csv` file in a directory in sorted order.
pub fn get_csv_files(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        if !has_extension(input, "csv") {
            return Err(format!("Input file '{}' is not a CSV file.", input.display()).into());
        }
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(format!(
            "Input path '{}' is neither a file nor a directory.",
            input.display()
        )
        .into());
    }
    let mut csv_files: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, "csv"))
        .collect();
    if csv_files.is_empty() {
        return Err(format!("No CSV files found in directory '{}'.", input.display()).into());
    }
    csv_files.sort();
    Ok(csv_files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case(extension))
}

/// Create the output directory if it does not exist yet.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.is_file() {
        return Err(format!(
            "Output path '{}' is a file, expected a directory.",
            output.display()
        )
        .into());
    }
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

/// Results file for a trajectory log: `<output>/<input stem>_results.csv`.
pub fn results_path(output: &Path, input_file: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let stem = input_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| format!("Input file path '{}' has no file name", input_file.display()))?;
    Ok(output.join(format!("{stem}_results.csv")))
}

/// Create the parent directory of a file that is about to be written.
pub fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_validate_input_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("log.csv");
        File::create(&file_path).unwrap();

        assert!(validate_input_path(&file_path).is_ok());
        assert!(validate_input_path(dir.path()).is_ok());
        assert!(validate_input_path(Path::new("/nonexistent/path")).is_err());
    }

    #[test]
    fn test_get_csv_files_single_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("log.CSV");
        File::create(&file_path).unwrap();

        let result = get_csv_files(&file_path).unwrap();
        assert_eq!(result, vec![file_path]);
    }

    #[test]
    fn test_get_csv_files_directory_is_sorted() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("b.csv")).unwrap();
        File::create(dir.path().join("a.csv")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        let result = get_csv_files(dir.path()).unwrap();
        let names: Vec<_> = result
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_get_csv_files_rejects_non_csv_and_empty_directory() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("log.txt");
        assert!(get_csv_files(dir.path()).is_err());
        File::create(&file_path).unwrap();
        assert!(get_csv_files(&file_path).is_err());
    }

    #[test]
    fn test_validate_output_path_creates_directory() {
        let dir = tempdir().unwrap();
        let new_dir = dir.path().join("results").join("run_1");

        assert!(!new_dir.exists());
        validate_output_path(&new_dir).unwrap();
        assert!(new_dir.is_dir());
        assert!(validate_output_path(&new_dir).is_ok());
    }

    #[test]
    fn test_validate_output_path_rejects_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("results.csv");
        File::create(&file_path).unwrap();
        assert!(validate_output_path(&file_path).is_err());
    }

    #[test]
    fn test_results_path() {
        let path = results_path(Path::new("out"), Path::new("data/straight_line.csv")).unwrap();
        assert_eq!(path, PathBuf::from("out/straight_line_results.csv"));
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_log_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_log_level("chatty"), log::LevelFilter::Info);
    }
}
