use anyhow::{bail, Context, Result};
use comic_weaver::core::config::Config;
use comic_weaver::core::history::{HistoryEvent, HistoryStore};
use comic_weaver::core::io::NativeStorage;
use comic_weaver::core::random::ThreadFocusRng;
use comic_weaver::core::state::{Page, Persona};
use comic_weaver::services::export::{DocumentAssembler, ImageFolderAssembler};
use comic_weaver::services::image::{create_image_client, ImageClient};
use comic_weaver::services::llm::{create_llm, LlmClient};
use comic_weaver::services::session::ApiKeyValidator;
use comic_weaver::services::setup::run_setup;
use comic_weaver::services::workflow::PageOrchestrator;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Select, Text};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    if !config.unattended {
        run_setup(&mut config)?;
    }

    let llm: Arc<dyn LlmClient> = Arc::from(create_llm(&config.llm)?);
    let images: Arc<dyn ImageClient> =
        Arc::from(create_image_client(&config.image, config.llm.gemini.as_ref())?);
    let api_key = config
        .image
        .gemini
        .as_ref()
        .or(config.llm.gemini.as_ref())
        .map(|g| g.api_key.as_str());
    let validator = Arc::new(ApiKeyValidator::new(api_key));

    let orchestrator = PageOrchestrator::from_config(
        &config,
        llm,
        images,
        validator,
        Arc::new(ThreadFocusRng),
    );

    let storage = NativeStorage::new();
    let hero_path = match config.hero_image.clone() {
        Some(path) => path,
        None if !config.unattended => Text::new("Path to the hero's portrait:").prompt()?,
        None => bail!("Set 'hero_image' in config.yml to the hero's portrait"),
    };
    orchestrator.set_hero(Some(Persona::from_file(&storage, &hero_path, "Hero").await?));
    if let Some(path) = config.co_star_image.as_deref() {
        orchestrator.set_co_star(Some(Persona::from_file(&storage, path, "Co-Star").await?));
    }

    let layout = orchestrator.layout().clone();
    let pb = ProgressBar::new(layout.total_pages as u64 + 1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let tracker = tokio::spawn(track_progress(orchestrator.history(), pb.clone()));

    orchestrator.launch_story().await?.wait().await;
    orchestrator.open_book();

    let history = orchestrator.history();
    loop {
        let pending = history
            .all_pages()
            .into_iter()
            .find(|p| p.is_decision && p.resolved_choice.is_none() && !p.choices().is_empty());

        if let Some(page) = pending {
            let choice = pb.suspend(|| pick_choice(&page, config.unattended))?;
            if let Some(batch) = orchestrator.handle_choice(page.index, &choice)? {
                batch.await?;
            }
            continue;
        }

        if orchestrator.read_ahead().await.is_empty() {
            break;
        }
    }

    tracker.abort();
    pb.finish_with_message("done");

    let assembler = ImageFolderAssembler::new(&config.output_folder);
    let written = assembler.assemble(&history.all_pages(), &storage).await?;
    println!("Wrote {} files to {}", written.len(), config.output_folder);

    Ok(())
}

fn pick_choice(page: &Page, unattended: bool) -> Result<String> {
    let choices = page.choices().to_vec();
    if unattended {
        return choices
            .into_iter()
            .next()
            .context("Decision page has no choices");
    }

    if let Some(beat) = &page.beat {
        println!("\n[Page {}] {}", page.index, beat.caption);
        if !beat.dialogue.is_empty() {
            println!("  \"{}\"", beat.dialogue);
        }
    }
    Ok(Select::new("What happens next?", choices).prompt()?)
}

async fn track_progress(history: Arc<HistoryStore>, pb: ProgressBar) {
    let mut events = history.subscribe();
    let mut shown = HashSet::new();
    loop {
        match events.recv().await {
            Ok(HistoryEvent::Updated(index)) => {
                if let Some(page) = history.get(index).filter(|p| !p.loading && shown.insert(p.index)) {
                    if let Some(beat) = &page.beat {
                        if !beat.caption.is_empty() {
                            pb.println(format!("[Page {}] {}", page.index, beat.caption));
                        }
                    }
                }
            }
            Ok(HistoryEvent::Cleared) => shown.clear(),
            Ok(HistoryEvent::Appended(_)) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
        let done = history.all_pages().iter().filter(|p| !p.loading).count();
        pb.set_position(done as u64);
        pb.set_message(format!("{} in history", history.len()));
    }
}
