use clap::{Parser, ValueEnum};
use despacho_extract::{Config, DespachoExtractor, ExtractionResult, FieldName, PdfInfo};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Full result as pretty-printed JSON
    Json,
    /// One line per field of each document
    Summary,
}

#[derive(Parser)]
#[command(name = "despacho-extract")]
#[command(about = "Extract despacho and certidão fields from a PDF analysis dump", long_about = None)]
#[command(version)]
struct Args {
    /// JSON analysis written by the PDF reader
    #[arg(value_name = "ANALYSIS")]
    analysis: PathBuf,

    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Original PDF, hashed into the result
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Only bookmarks whose title contains this text
    #[arg(short, long)]
    bookmark_filter: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

fn fail(message: String) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).unwrap_or_else(|e| fail(format!("Error loading config {:?}: {}", path, e))),
        None => Config::default(),
    };

    let mut builder = DespachoExtractor::builder().config(config);
    if let Some(filter) = args.bookmark_filter {
        builder = builder.bookmark_filter(filter);
    }
    let extractor = builder
        .build()
        .unwrap_or_else(|e| fail(format!("Error preparing extractor: {}", e)));

    let mut analysis = despacho_extract::load_analysis(&args.analysis)
        .unwrap_or_else(|e| fail(format!("Error reading analysis {:?}: {}", args.analysis, e)));
    if let Some(pdf) = &args.pdf {
        let bytes = std::fs::read(pdf).unwrap_or_else(|e| fail(format!("Error reading {:?}: {}", pdf, e)));
        let page_count = analysis.info.page_count;
        analysis.info = PdfInfo {
            page_count,
            ..PdfInfo::from_bytes(pdf, &bytes)
        };
    }

    let result = extractor.extract(&analysis);

    match args.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(format!("Error serializing result: {}", e)),
        },
        OutputFormat::Summary => print_summary(&result),
    }

    if !result.errors.is_empty() {
        std::process::exit(2);
    }
}

fn print_summary(result: &ExtractionResult) {
    println!("{} ({} pages)", result.pdf_info.name, result.pdf_info.page_count);
    for error in &result.errors {
        println!("  error: {}", error);
    }
    for doc in &result.documents {
        println!(
            "{:?} pages {}-{} score {:.3}{}",
            doc.doc_type,
            doc.start_page,
            doc.end_page,
            doc.match_score,
            doc.subtype.as_deref().map(|s| format!(" [{}]", s)).unwrap_or_default()
        );
        for warning in &doc.warnings {
            println!("  warning: {}", warning);
        }
        for name in FieldName::ALL {
            let Some(field) = doc.field(name) else {
                continue;
            };
            if field.is_absent() {
                continue;
            }
            let page = field.evidence.as_ref().map(|e| e.page).unwrap_or(0);
            println!(
                "  {:<24} {:<40} {:.2} {} p{}",
                name.as_str(),
                field.value,
                field.confidence,
                field.method,
                page
            );
        }
    }
}
