#![forbid(unsafe_code)]

//! Ulriksdal CLI: XML-DSig reference and manifest verification.

use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use ulriksdal_core::Error;
use ulriksdal_dsig::VerifyContext;

#[derive(Parser)]
#[command(
    name = "ulriksdal",
    about = "Ulriksdal: XML-DSig reference and manifest verification",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the commands that process a signed document.
#[derive(clap::Args)]
struct ContextArgs {
    /// Register additional ID attribute names
    #[arg(long = "id-attr")]
    id_attr: Vec<String>,

    /// Map an external URI to a local file (URL=FILE)
    #[arg(long = "url-map")]
    url_map: Vec<String>,

    /// Base directory for relative external references
    #[arg(long = "base-dir")]
    base_dir: Option<PathBuf>,

    /// Disable secure validation limits
    #[arg(long)]
    insecure: bool,

    /// Maximum depth of followed manifests
    #[arg(long = "max-depth")]
    max_depth: Option<usize>,

    /// Do not retry malformed referenced content inside a wrapper element
    #[arg(long = "no-recovery")]
    no_recovery: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the references of a signed XML document
    Verify {
        /// Input XML file
        file: PathBuf,

        /// Follow references typed as Manifest into nested manifests
        #[arg(long = "follow-manifests")]
        follow_manifests: bool,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Print computed and expected digests per reference
    Digest {
        /// Input XML file
        file: PathBuf,

        /// Also print the bytes that were digested
        #[arg(long = "show-pre-digest")]
        show_pre_digest: bool,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// List supported digest and transform algorithms
    Info,
}

fn main() {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::Verify { context, .. } | Commands::Digest { context, .. } => context.verbose,
        Commands::Info => false,
    };
    init_tracing(verbose);

    let result = match cli.command {
        Commands::Verify {
            file,
            follow_manifests,
            context,
        } => cmd_verify(file, follow_manifests, context),

        Commands::Digest {
            file,
            show_pre_digest,
            context,
        } => cmd_digest(file, show_pre_digest, context),

        Commands::Info => cmd_info(),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_context(args: &ContextArgs) -> Result<VerifyContext, Error> {
    let mut ctx = VerifyContext::new();
    for attr in &args.id_attr {
        ctx.add_id_attr(attr);
    }
    for spec in &args.url_map {
        let (url, file) = spec
            .split_once('=')
            .ok_or_else(|| Error::Other(format!("invalid url-map format: {spec} (expected URL=FILE)")))?;
        ctx.add_url_map(url, file);
    }
    ctx.base_dir = args.base_dir.as_ref().map(|p| p.display().to_string());
    ctx.secure_validation = !args.insecure;
    ctx.legacy_fragment_recovery = !args.no_recovery;
    if let Some(depth) = args.max_depth {
        ctx.max_manifest_depth = depth;
    }
    ctx.debug = args.verbose;
    Ok(ctx)
}

fn cmd_verify(file: PathBuf, follow_manifests: bool, args: ContextArgs) -> Result<bool, Error> {
    let xml = read_file(&file)?;
    let mut ctx = build_context(&args)?;
    if ctx.base_dir.is_none() {
        ctx.base_dir = file.parent().map(|p| p.display().to_string());
    }

    tracing::info!(file = %file.display(), follow_manifests, "verifying");

    let report = ulriksdal_dsig::verify_references_in_document(&ctx, &xml, follow_manifests)?;
    if report.is_valid() {
        println!("OK");
        return Ok(true);
    }
    for failure in report.failures() {
        println!(
            "FAILED: URI={} Id={}",
            failure.uri.as_deref().unwrap_or("(none)"),
            failure.id.as_deref().unwrap_or("(none)")
        );
    }
    if report.failures().next().is_none() {
        println!("FAILED: nested manifest verification failed");
    }
    Ok(false)
}

fn cmd_digest(file: PathBuf, show_pre_digest: bool, args: ContextArgs) -> Result<bool, Error> {
    let xml = read_file(&file)?;
    let mut ctx = build_context(&args)?;
    if ctx.base_dir.is_none() {
        ctx.base_dir = file.parent().map(|p| p.display().to_string());
    }

    let b64 = base64::engine::general_purpose::STANDARD;
    let entries = ulriksdal_dsig::digest_report(&ctx, &xml)?;
    let mut all_match = true;
    for entry in &entries {
        println!("=== Reference URI: {}", entry.uri.as_deref().unwrap_or("(none)"));
        println!("Algorithm: {}", entry.algorithm);
        if show_pre_digest {
            println!("PreDigest data ({} bytes):", entry.pre_digest.len());
            println!("{}", String::from_utf8_lossy(&entry.pre_digest));
            println!("--- END PreDigest ---");
        }
        println!("Computed: {}", b64.encode(&entry.computed));
        match &entry.expected {
            Some(expected) => println!("Expected: {}", b64.encode(expected)),
            None => println!("Expected: (none)"),
        }
        println!("Match: {}", entry.matches());
        all_match &= entry.matches();
    }
    Ok(all_match)
}

fn cmd_info() -> Result<bool, Error> {
    let ctx = VerifyContext::new();
    println!("Ulriksdal: XML-DSig reference and manifest verification");
    println!();
    println!("Supported digest algorithms:");
    for uri in ctx.digests.uris() {
        println!("  {uri}");
    }
    println!();
    println!("Supported transforms:");
    for uri in ctx.transforms.uris() {
        println!("  {uri}");
    }
    println!();
    println!("Secure validation limits:");
    println!(
        "  {} references per manifest, {} transforms per reference",
        ulriksdal_dsig::MAXIMUM_REFERENCE_COUNT,
        ulriksdal_transforms::MAXIMUM_TRANSFORM_COUNT
    );
    Ok(true)
}

// ── Utility functions ────────────────────────────────────────────────

fn read_file(path: &PathBuf) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}
