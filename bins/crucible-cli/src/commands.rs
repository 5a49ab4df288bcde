// CLI commands for running programs and probing runner services
use anyhow::{Context, Result};
use crucible_core::{
    Backend, ExecutionRequest, ExecutionResponse, Orchestrator, RemoteBackend, RunnerConfig,
};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Stdin for the program: inline text, a file, or nothing
pub fn read_input(inline: Option<String>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display())),
        (None, None) => Ok(String::new()),
    }
}

/// Run a source file locally or through `remote`; returns whether it ran cleanly
pub async fn run_file(file: &Path, input: String, remote: Option<&str>) -> Result<bool> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read source file {}", file.display()))?;

    let config = RunnerConfig::from_env().context("Failed to load configuration")?;
    let backend: Box<dyn Backend> = match remote {
        Some(url) => Box::new(RemoteBackend::new(
            &run_url(url),
            config.remote.timeout(),
            config.limits.clone(),
        )?),
        None => Box::new(Orchestrator::from_config(&config)?),
    };

    let response = match backend.execute(ExecutionRequest::new(code, input)).await {
        Ok(report) => report.response,
        Err(e) => {
            let mut response = ExecutionResponse::failure(e.public_message());
            response.details = e.details();
            response
        }
    };

    print_response(&response)?;
    Ok(response.error.is_empty())
}

/// Accept either the service base URL or the full `/run` endpoint
fn run_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with("/run") {
        url.to_string()
    } else {
        format!("{}/run", url)
    }
}

fn print_response(response: &ExecutionResponse) -> Result<()> {
    if !response.output.is_empty() {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", response.output)?;
    }
    if !response.error.is_empty() {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{}", response.error)?;
        if let Some(details) = &response.details {
            writeln!(stderr, "details: {}", details)?;
        }
    }
    Ok(())
}

/// GET `<url>/health`; true only on 200
pub async fn health(url: &str) -> Result<bool> {
    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    let response = match client.get(&endpoint).send().await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("✗ {} unreachable: {}", endpoint, e);
            return Ok(false);
        }
    };

    let status = response.status();
    if status == reqwest::StatusCode::OK {
        println!("✓ {} is healthy", url);
        Ok(true)
    } else {
        eprintln!("✗ {} responded with status {}", endpoint, status.as_u16());
        Ok(false)
    }
}

pub fn print_config() -> Result<()> {
    let config = RunnerConfig::from_env().context("Failed to load configuration")?;
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_url_normalization() {
        assert_eq!(run_url("http://localhost:3001"), "http://localhost:3001/run");
        assert_eq!(run_url("http://localhost:3001/"), "http://localhost:3001/run");
        assert_eq!(run_url("http://runner/run"), "http://runner/run");
    }

    #[test]
    fn test_read_input_prefers_inline_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stdin.txt");
        fs::write(&path, "5 7\n").unwrap();

        assert_eq!(read_input(Some("1 2".into()), None).unwrap(), "1 2");
        assert_eq!(read_input(None, Some(&path)).unwrap(), "5 7\n");
        assert_eq!(read_input(None, None).unwrap(), "");
        assert!(read_input(None, Some(&tmp.path().join("missing"))).is_err());
    }
}
