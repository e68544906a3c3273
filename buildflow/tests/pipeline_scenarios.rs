//! # Pipeline Scenario Tests
//!
//! End-to-end builds through the engine facade: literal inputs in,
//! asserted summaries out.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test pipeline_scenarios
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use buildflow::{
    BuildEngine, Concurrency, EngineConfig, EngineError, FileSpec, PathFilter, PluginBuilder,
};
use parking_lot::Mutex;

fn engine(concurrency: usize) -> BuildEngine {
    BuildEngine::new(
        EngineConfig::default()
            .with_cwd(".")
            .with_concurrency(Concurrency::new(concurrency).unwrap())
            .with_dev(false)
            .with_debug(false),
    )
}

/// The three-file source used across scenarios: 0 + 13 + 15 = 28 bytes.
fn three_file_source() -> PluginBuilder {
    PluginBuilder::named("source").read_specs(vec![
        FileSpec::new("file1.txt"),
        FileSpec::new("file2.txt").with_text("Hello, world!"),
        FileSpec::new("file3.txt").with_contents(vec![0u8; 15]),
    ])
}

#[tokio::test]
async fn empty_run_produces_an_empty_summary() {
    let engine = engine(2);
    engine
        .use_plugin(PluginBuilder::named("source").read_specs(Vec::<FileSpec>::new()))
        .await
        .unwrap();
    engine
        .use_plugin(PluginBuilder::from_fn(|file, _run| async move { Ok(vec![file]) }))
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();
    assert_eq!(summary.input().file_count, 0);
    assert_eq!(summary.input().file_size, 0);
    assert_eq!(summary.output().file_count, 0);
    assert_eq!(summary.output().file_size, 0);
    engine.dispose().await;
}

#[tokio::test]
async fn pass_through_preserves_counts_and_sizes() {
    let engine = engine(2);
    engine.use_plugin(three_file_source()).await.unwrap();
    engine
        .use_plugin(
            PluginBuilder::named("identity").process_file_fn(|file, _run| async move { Ok(vec![file]) }),
        )
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();
    assert_eq!(summary.input().file_count, 3);
    assert_eq!(summary.input().file_size, 28);
    assert_eq!(summary.output().file_count, 3);
    assert_eq!(summary.output().file_size, 28);
    engine.dispose().await;
}

#[tokio::test]
async fn filter_miss_forwards_files_untouched() {
    let engine = engine(2);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_by_plugin = seen.clone();

    engine.use_plugin(three_file_source()).await.unwrap();
    engine
        .use_plugin(
            PluginBuilder::named("html-only")
                .filter(PathFilter::glob("*.html").unwrap())
                .process_file_fn(move |mut file, _run| {
                    let seen = seen_by_plugin.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        let mut text = file.text_lossy().into_owned();
                        text.push_str("12345");
                        file.set_text(text);
                        Ok(vec![file])
                    }
                }),
        )
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();
    // Nothing matched *.html: nothing was mutated, everything forwarded.
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert_eq!(summary.input().file_count, 3);
    assert_eq!(summary.input().file_size, 28);
    assert_eq!(summary.output().file_count, 3);
    assert_eq!(summary.output().file_size, 28);
    engine.dispose().await;
}

#[tokio::test]
async fn fan_out_multiplies_files() {
    let engine = engine(2);
    engine.use_plugin(three_file_source()).await.unwrap();
    engine
        .use_plugin(PluginBuilder::named("splitter").process_file_fn(|file, _run| async move {
            match file.path().to_slash_string().as_str() {
                "file2.txt" => Ok(vec![
                    file.derived(FileSpec::new("file2a.txt").with_text("Hello"))?,
                    file.derived(FileSpec::new("file2b.txt").with_text("world!"))?,
                ]),
                "file3.txt" => {
                    let alphabet = "abcdefghijklmnopqrstuvwxyz";
                    Ok(vec![
                        file.derived(FileSpec::new("file3a.txt").with_text(alphabet))?,
                        file.derived(FileSpec::new("file3b.txt").with_text(alphabet))?,
                        file.derived(FileSpec::new("file3c.txt").with_text(alphabet))?,
                    ])
                }
                _ => Ok(vec![file]),
            }
        }))
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();
    assert_eq!(summary.input().file_count, 3);
    assert_eq!(summary.input().file_size, 28);
    assert_eq!(summary.output().file_count, 6);
    assert_eq!(summary.output().file_size, 89);
    engine.dispose().await;
}

#[tokio::test]
async fn matching_files_reach_both_capabilities() {
    let engine = engine(2);
    let per_file_seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let stream_seen = Arc::new(Mutex::new(Vec::<String>::new()));

    engine.use_plugin(three_file_source()).await.unwrap();

    let per_file = per_file_seen.clone();
    let per_stream = stream_seen.clone();
    engine
        .use_plugin(
            PluginBuilder::named("dual")
                .filter(PathFilter::glob("*.txt").unwrap())
                .process_file_fn(move |file, _run| {
                    let per_file = per_file.clone();
                    async move {
                        per_file.lock().push(file.path().to_slash_string());
                        Ok(vec![file])
                    }
                })
                .process_files_fn(move |input, _run| {
                    let per_stream = per_stream.clone();
                    async move {
                        use buildflow::{EngineError, VirtualFile};
                        use futures::StreamExt;
                        let observed: buildflow_domain::FileStream = Box::pin(
                            input
                                .inspect(move |item| {
                                    if let Ok(file) = item {
                                        per_stream.lock().push(file.path().to_slash_string());
                                    }
                                })
                                .filter_map(|_item| async move { None::<Result<VirtualFile, EngineError>> }),
                        );
                        Ok(observed)
                    }
                }),
        )
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();

    let mut a = per_file_seen.lock().clone();
    let mut b = stream_seen.lock().clone();
    a.sort();
    b.sort();
    assert_eq!(a, vec!["file1.txt", "file2.txt", "file3.txt"]);
    assert_eq!(b, a, "both capabilities observe every matching file");
    // The per-file path echoed the files; the stream path swallowed them.
    assert_eq!(summary.output().file_count, 3);
    engine.dispose().await;
}

#[tokio::test]
async fn in_flight_invocations_respect_the_concurrency_bound() {
    let limit = 3;
    let engine = engine(limit);

    let specs: Vec<FileSpec> = (0..24).map(|i| FileSpec::new(format!("f{}.txt", i))).collect();
    engine
        .use_plugin(PluginBuilder::named("many").read_specs(specs))
        .await
        .unwrap();

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let c = current.clone();
    let p = peak.clone();
    engine
        .use_plugin(PluginBuilder::named("slow").process_file_fn(move |file, _run| {
            let current = c.clone();
            let peak = p.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(3)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![file])
            }
        }))
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();
    assert_eq!(summary.output().file_count, 24);
    assert!(
        peak.load(Ordering::SeqCst) <= limit,
        "peak {} exceeded the concurrency bound {}",
        peak.load(Ordering::SeqCst),
        limit
    );
    engine.dispose().await;
}

#[tokio::test]
async fn duplicate_paths_are_allowed_within_a_run() {
    let engine = engine(2);
    engine
        .use_plugin(PluginBuilder::named("dup-source").read_specs(vec![
            FileSpec::new("same.txt").with_text("one"),
            FileSpec::new("same.txt").with_text("two"),
        ]))
        .await
        .unwrap();
    engine
        .use_plugin(PluginBuilder::from_fn(|file, _run| async move { Ok(vec![file]) }))
        .await
        .unwrap();

    let summary = engine.build().await.unwrap();
    assert_eq!(summary.input().file_count, 2);
    assert_eq!(summary.output().file_count, 2);
    engine.dispose().await;
}

#[tokio::test]
async fn chained_steps_run_in_insertion_order() {
    let engine = engine(2);
    engine
        .use_plugin(PluginBuilder::named("source").read_specs(vec![FileSpec::new("a.txt").with_text("x")]))
        .await
        .unwrap();
    engine
        .use_plugin(PluginBuilder::named("first").process_file_fn(|mut file, _run| async move {
            let text = format!("{}-first", file.text_lossy());
            file.set_text(text);
            Ok(vec![file])
        }))
        .await
        .unwrap();

    let result = Arc::new(Mutex::new(String::new()));
    let captured = result.clone();
    engine
        .use_plugin(PluginBuilder::named("second").process_file_fn(move |mut file, _run| {
            let captured = captured.clone();
            async move {
                let text = format!("{}-second", file.text_lossy());
                file.set_text(text.clone());
                *captured.lock() = text;
                Ok(vec![file])
            }
        }))
        .await
        .unwrap();

    engine.build().await.unwrap();
    assert_eq!(*result.lock(), "x-first-second");
    engine.dispose().await;
}

#[tokio::test]
async fn a_failing_step_rejects_the_whole_run() {
    let engine = engine(2);
    engine.use_plugin(three_file_source()).await.unwrap();
    engine
        .use_plugin(PluginBuilder::named("exploder").process_file_fn(|file, _run| async move {
            if file.path().to_slash_string() == "file2.txt" {
                return Err(EngineError::io_error("disk on fire"));
            }
            Ok(vec![file])
        }))
        .await
        .unwrap();

    let err = engine.build().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "An error occurred in exploder while processing file2.txt."
    );
    assert_eq!(err.root_cause().to_string(), "IO error: disk on fire");
    engine.dispose().await;
}

#[tokio::test]
async fn source_files_carry_their_plugin_origin() {
    let engine = engine(1);
    engine
        .use_plugin(PluginBuilder::named("origin-source").read_specs(vec![FileSpec::new("a.txt")]))
        .await
        .unwrap();

    let origins = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = origins.clone();
    engine
        .use_plugin(PluginBuilder::named("observer").process_file_fn(move |file, _run| {
            let captured = captured.clone();
            async move {
                captured.lock().push(file.origin().to_string());
                Ok(vec![file])
            }
        }))
        .await
        .unwrap();

    engine.build().await.unwrap();
    assert_eq!(origins.lock().as_slice(), ["plugin://origin-source"]);
    engine.dispose().await;
}
