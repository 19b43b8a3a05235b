use axum::Router;
use bramble_ssg::{BuildOptions, BuildResult, RebuildOutcome, SiteBuilder, WatchSession};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;

const DEBOUNCE_DURATION: Duration = Duration::from_millis(300);

const DEFAULT_LAYOUT: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>{{ page.title }} | {{ site.title }}</title>
  <link rel="stylesheet" href="/assets/site.css">
</head>
<body>
{% include "header.html" %}
<main>{{ content }}</main>
</body>
</html>
"#;

const POST_LAYOUT: &str = r#"---
layout: default
---
<article>
  <h1>{{ page.title }}</h1>
  {{ content }}
</article>
"#;

const HEADER_INCLUDE: &str = r#"<header>
  <a href="/">{{ site.title }}</a> <a href="/about/">About</a>
</header>
"#;

const INDEX_PAGE: &str = r#"---
title: Home
---
<ul>
{% for post in paginator.items %}  <li><a href="{{ post.url }}">{{ post.title }}</a></li>
{% endfor %}</ul>
{% if paginator.next_page_path %}<a href="{{ paginator.next_page_path }}">Older posts</a>{% endif %}
"#;

const ABOUT_PAGE: &str = r#"---
title: About
---
This is the about page.
"#;

const FIRST_POST: &str = r#"---
title: Hello World
tags: [welcome]
---
This is your first post. Start writing!

```rust
fn main() {
    println!("Hello, world!");
}
```
"#;

const STYLESHEET: &str = "body { font-family: sans-serif; max-width: 40rem; margin: 2rem auto; }\n";

fn escape_toml_string(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for character in input.chars() {
        match character {
            '\\' => output.push_str("\\\\"),
            '"' => output.push_str("\\\""),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            control if control < '\u{0020}' => {
                output.push_str(&format!("\\u{:04X}", control as u32));
            }
            other => output.push(other),
        }
    }
    output
}

fn site_config(name: &str) -> String {
    let escaped_name = escape_toml_string(name);
    format!(
        r#"title = "{escaped_name}"
description = "A new Bramble site"
paginate = 10

[[defaults]]
scope = {{ path = "", type = "posts" }}
values = {{ layout = "post" }}

[[defaults]]
scope = {{ path = "", type = "pages" }}
values = {{ layout = "default" }}
"#
    )
}

pub fn new_site(site_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if site_dir.exists() {
        return Err(format!("Directory '{}' already exists", site_dir.display()).into());
    }

    let name = site_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "My Site".to_string());

    let files = [
        ("bramble.toml", site_config(&name)),
        ("_layouts/default.html", DEFAULT_LAYOUT.to_string()),
        ("_layouts/post.html", POST_LAYOUT.to_string()),
        ("_includes/header.html", HEADER_INCLUDE.to_string()),
        ("index.html", INDEX_PAGE.to_string()),
        ("about.md", ABOUT_PAGE.to_string()),
        ("_posts/2024-01-01-hello-world.md", FIRST_POST.to_string()),
        ("assets/site.css", STYLESHEET.to_string()),
    ];

    for (relative, content) in files {
        let path = site_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    fs::create_dir_all(site_dir.join("_data"))?;

    println!("Created new site: {}", site_dir.display());
    println!("  cd {}", site_dir.display());
    println!("  bramble serve");

    Ok(())
}

pub fn build_site(
    source: &Path,
    options: &BuildOptions,
    show_timings: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Building site...");

    let mut builder = SiteBuilder::new(source)?;
    let result = builder.build(options)?;

    println!(
        "Built to {} in {:.2?}: {}",
        builder.destination_dir().display(),
        result.timings.total,
        result.summary
    );
    if show_timings {
        print!("{}", format_timings(&result));
    }

    Ok(())
}

pub fn clean_site(source: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = SiteBuilder::new(source)?;
    builder.clean()?;
    println!("Removed {} and the build cache", builder.destination_dir().display());
    Ok(())
}

/// Slowest stage first, one per line.
fn format_timings(result: &BuildResult) -> String {
    result
        .timings
        .sorted_by_duration()
        .into_iter()
        .map(|timing| {
            format!(
                "  {:<10} {:>10.2?}  {}\n",
                timing.operation, timing.duration, timing.detail
            )
        })
        .collect()
}

fn event_paths(event: notify::Result<notify::Event>) -> Vec<PathBuf> {
    match event {
        Ok(event) => event.paths,
        Err(error) => {
            tracing::warn!("watch error: {error}");
            Vec::new()
        }
    }
}

fn report_rebuild(outcome: RebuildOutcome) {
    match outcome {
        RebuildOutcome::Completed(_) => {}
        RebuildOutcome::Skipped => tracing::debug!("no rebuild needed"),
        RebuildOutcome::Failed(error) => eprintln!("Rebuild error: {error}"),
    }
}

/// Calls `reload` once per rebuild notice until every sender is gone.
async fn forward_reloads(mut reload_rx: broadcast::Receiver<()>, reload: impl Fn()) {
    loop {
        match reload_rx.recv().await {
            // Missed notices still mean the output changed.
            Ok(()) | Err(RecvError::Lagged(_)) => reload(),
            Err(RecvError::Closed) => break,
        }
    }
}

pub async fn serve_site(
    source: &Path,
    port: u16,
    drafts: bool,
    future: bool,
    open_browser: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = fs::canonicalize(source)?;
    let builder = SiteBuilder::new(&source_dir)?;
    let output_dir = builder.destination_dir().to_path_buf();
    let options = BuildOptions {
        incremental: true,
        show_drafts: drafts,
        show_future: future,
        ..BuildOptions::default()
    };

    let (reload_tx, _) = broadcast::channel::<()>(16);
    let reload_tx = Arc::new(reload_tx);
    let rebuild_tx = Arc::clone(&reload_tx);

    let session = Arc::new(WatchSession::new(builder, options).on_rebuild(move |result| {
        println!("Rebuilt in {:.2?}: {}", result.timings.total, result.summary);
        let _ = rebuild_tx.send(());
    }));

    println!("Building site...");
    let initial = session.with_builder(|builder| builder.build(&options))?;
    println!("Built in {:.2?}: {}", initial.timings.total, initial.summary);

    let (notify_tx, notify_rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        notify_tx,
        Config::default().with_poll_interval(Duration::from_millis(200)),
    )?;
    watcher.watch(&source_dir, RecursiveMode::Recursive)?;

    let watch_session = Arc::clone(&session);
    std::thread::spawn(move || {
        loop {
            match notify_rx.recv() {
                Ok(event) => {
                    let mut paths = event_paths(event);
                    loop {
                        match notify_rx.recv_timeout(DEBOUNCE_DURATION) {
                            Ok(event) => paths.extend(event_paths(event)),
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }

                    // The gate drops this request if a rebuild is still running.
                    let session = Arc::clone(&watch_session);
                    std::thread::spawn(move || report_rebuild(session.handle_changes(&paths)));
                }
                Err(error) => {
                    eprintln!("Watch error: {error}");
                    break;
                }
            }
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Serving at http://{addr}");
    println!("Press Ctrl+C to stop");

    if open_browser {
        let url = format!("http://localhost:{}", port);
        if let Err(error) = open::that(&url) {
            eprintln!("Failed to open browser: {error}");
        }
    }

    let livereload = tower_livereload::LiveReloadLayer::new();
    let reloader = livereload.reloader();

    tokio::spawn(forward_reloads(reload_tx.subscribe(), move || reloader.reload()));

    let serve_dir = ServeDir::new(output_dir).append_index_html_on_directories(true);

    let app = Router::new().fallback_service(serve_dir).layer(livereload);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bramble_ssg::SiteConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_escape_toml_string() {
        assert_eq!(escape_toml_string("hello world"), "hello world");
        assert_eq!(escape_toml_string("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_toml_string("a\\b"), "a\\\\b");
        assert_eq!(escape_toml_string("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_toml_string("bell\u{0007}"), "bell\\u0007");
    }

    #[test]
    fn test_site_config_parses() {
        let content = site_config("My \"Blog\"");
        let config = SiteConfig::parse(&content, Path::new("bramble.toml")).unwrap();
        assert_eq!(config.title, "My \"Blog\"");
        assert_eq!(config.paginate, 10);
        assert_eq!(config.defaults.len(), 2);
    }

    #[test]
    fn test_new_site_builds() {
        let dir = TempDir::new().unwrap();
        let site_dir = dir.path().join("blog");
        new_site(&site_dir).unwrap();

        let mut builder = SiteBuilder::new(&site_dir).unwrap();
        let result = builder.build(&BuildOptions::default()).unwrap();
        assert!(result.summary.failed.is_empty(), "{}", result.summary);

        let output = site_dir.join("_site");
        let index = fs::read_to_string(output.join("index.html")).unwrap();
        assert!(index.contains("Hello World"));
        assert!(index.contains("<title>Home | blog</title>"));
        assert!(output.join("about/index.html").is_file());
        assert!(output.join("2024/01/01/hello-world/index.html").is_file());
        assert!(output.join("assets/site.css").is_file());
    }

    #[test]
    fn test_new_site_refuses_existing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(new_site(dir.path()).is_err());
    }

    #[test]
    fn test_format_timings_slowest_first() {
        let mut result = BuildResult::default();
        result.timings.record("reading", Duration::from_millis(3), "3 documents");
        result.timings.record("rendering", Duration::from_millis(30), "3 documents");

        let text = format_timings(&result);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].trim_start().starts_with("rendering"));
        assert!(lines[1].ends_with("3 documents"));
    }

    #[test]
    fn test_event_paths_drops_errors() {
        let event = notify::Event::new(notify::EventKind::Any).add_path(PathBuf::from("a.md"));
        assert_eq!(event_paths(Ok(event)), vec![PathBuf::from("a.md")]);
        assert!(event_paths(Err(notify::Error::generic("boom"))).is_empty());
    }

    #[tokio::test]
    async fn test_forward_reloads_ends_when_channel_closes() {
        let (reload_tx, reload_rx) = broadcast::channel(1);
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reloads);

        for _ in 0..3 {
            reload_tx.send(()).unwrap();
        }
        drop(reload_tx);

        forward_reloads(reload_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        // One for the lag notice, one for the notice still buffered.
        assert_eq!(reloads.load(Ordering::SeqCst), 2);
    }
}
