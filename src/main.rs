//! Command-line entry point: answer a question against the indexed
//! collection, falling back to live web search when local evidence is weak.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use adaptive_rag::clients::{
    ChatClient, DuckDuckGoSearch, OpenAiAnswerGenerator, OpenAiCoverageJudge, OpenAiEmbedder,
    OpenAiFaithfulnessJudge, OpenAiRelevanceJudge, QdrantRetriever,
};
use adaptive_rag::{AppConfig, RagWorkflowBuilder, WorkflowError};

#[derive(Parser, Debug)]
#[command(
    name = "adaptive-rag",
    about = "Answer a question with retrieval, web-search fallback, and answer validation",
    version
)]
struct Args {
    /// Question to answer.
    question: String,

    /// Override the workflow step budget.
    #[arg(long)]
    limit: Option<usize>,

    /// Number of web search results to pull in when local evidence is weak.
    #[arg(short = 'k', long = "results")]
    results: Option<usize>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "adaptive_rag=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    dotenvy::dotenv().ok();

    let mut config = AppConfig::from_env();
    if let Some(limit) = args.limit {
        config = config.with_recursion_limit(limit);
    }
    if let Some(k) = args.results {
        config = config.with_search_results(k);
    }
    config.validate().context("invalid configuration")?;

    let chat = Arc::new(ChatClient::from_config(&config));
    let embedder = Arc::new(OpenAiEmbedder::from_config(&config));
    let retriever = Arc::new(QdrantRetriever::from_config(&config, embedder));

    let workflow = RagWorkflowBuilder::new()
        .retriever(retriever)
        .relevance_judge(Arc::new(OpenAiRelevanceJudge::new(chat.clone())))
        .web_search(Arc::new(DuckDuckGoSearch::new(config.request_timeout())))
        .answer_generator(Arc::new(OpenAiAnswerGenerator::new(chat.clone())))
        .faithfulness_judge(Arc::new(OpenAiFaithfulnessJudge::new(chat.clone())))
        .coverage_judge(Arc::new(OpenAiCoverageJudge::new(chat)))
        .step_budget(config.recursion_limit)
        .search_results(config.search_results)
        .thresholds(config.thresholds())
        .build()
        .context("failed to assemble workflow")?;

    info!(question = %args.question, "starting workflow");

    match workflow.answer(&args.question).await {
        Ok(state) => {
            match state.solution {
                Some(solution) => println!("{solution}"),
                None => println!("(no answer produced)"),
            }
            let sources: Vec<&str> = state
                .documents
                .iter()
                .filter_map(|doc| doc.source.as_deref())
                .collect();
            if !sources.is_empty() {
                println!("\nSources:");
                for source in sources {
                    println!("  - {source}");
                }
            }
            Ok(())
        }
        Err(WorkflowError::RecursionLimitExceeded { limit, state }) => {
            eprintln!(
                "Gave up after {limit} steps without a validated answer.\n\
                 Last candidate: {}",
                state.solution.as_deref().unwrap_or("(none)")
            );
            std::process::exit(1);
        }
        Err(err) => Err(err).context("workflow failed"),
    }
}
