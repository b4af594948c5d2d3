// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kiln::concretizer::ConcreteCache;
use kiln::{
    BuildOptions, BuildPlan, Concretizer, KilnConfig, RecipeRegistry, Spec, explain,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Concretize package requests and build them in dependency order", long_about = None)]
struct Cli {
    /// Configuration file (default: $KILN_CONFIG or ~/.config/kiln/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Recipe repository directory; overrides the configured list
    #[arg(short, long = "repo", global = true)]
    repos: Vec<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the packages in the recipe repositories
    List,
    /// Show a package recipe
    Info {
        /// Package name
        package: String,
    },
    /// Resolve a spec into a fully pinned dependency tree
    Concretize {
        /// Spec such as 'mfem-mgis@develop+suite-sparse'
        spec: String,
        /// Ignore and do not update the result cache
        #[arg(long)]
        no_cache: bool,
        /// Print the concrete spec as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the build order for a spec
    Plan {
        spec: String,
    },
    /// Concretize a spec and build it with its dependencies
    Build {
        spec: String,
        /// Maximum concurrent builds
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Show what would be built without running anything
        #[arg(long)]
        dry_run: bool,
        /// Stop all builds on the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Keep stage directories of successful builds
        #[arg(long)]
        keep_stage: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = KilnConfig::discover(cli.config.as_deref()).context("Failed to load configuration")?;
    let registry = load_registry(&config, &cli.repos)?;

    match cli.command {
        Commands::List => {
            for name in registry.names() {
                let recipe = registry.lookup(name)?;
                match &recipe.description {
                    Some(description) => println!("{:<24} {}", name, description),
                    None => println!("{}", name),
                }
            }
            Ok(())
        }
        Commands::Info { package } => cmd_info(&registry, &package),
        Commands::Concretize { spec, no_cache, json } => {
            let concrete = resolve(&config, &registry, &spec, !no_cache)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&concrete)?);
            } else {
                print!("{}", concrete.tree());
            }
            Ok(())
        }
        Commands::Plan { spec } => {
            let concrete = resolve(&config, &registry, &spec, true)?;
            let plan = kiln::plan(&concrete)?;
            print!("{}", plan);
            Ok(())
        }
        Commands::Build {
            spec,
            jobs,
            dry_run,
            fail_fast,
            keep_stage,
        } => {
            let mut options = BuildOptions::from_config(&config);
            if let Some(jobs) = jobs {
                options.max_parallelism = jobs;
            }
            options.dry_run = dry_run;
            options.fail_fast |= fail_fast;
            options.keep_stage |= keep_stage;

            let concrete = resolve(&config, &registry, &spec, true)?;
            let mut plan: BuildPlan = kiln::plan(&concrete)?;
            let report = kiln::build(Arc::new(registry), &mut plan, &options)?;

            print!("{}", report);
            for failed in report.failed() {
                if !failed.stderr.is_empty() {
                    eprintln!("--- {} stderr ---\n{}", failed.key, failed.stderr.trim_end());
                }
            }
            if !report.success() {
                bail!("Build of {} failed", concrete.name);
            }
            Ok(())
        }
    }
}

fn load_registry(config: &KilnConfig, repos: &[PathBuf]) -> Result<RecipeRegistry> {
    let dirs = if repos.is_empty() {
        config.paths.repo_dirs.as_slice()
    } else {
        repos
    };
    if dirs.is_empty() {
        bail!("No recipe repositories configured; pass --repo or set paths.repo_dirs");
    }
    let registry = RecipeRegistry::from_dirs(dirs).context("Failed to load recipes")?;
    debug!("Loaded {} recipes", registry.len());
    Ok(registry)
}

fn resolve(config: &KilnConfig, registry: &RecipeRegistry, text: &str, use_cache: bool) -> Result<Spec> {
    let request = Spec::parse(text).with_context(|| format!("Invalid spec '{}'", text))?;
    let mut concretizer = Concretizer::new(registry);

    let cache_file = config.paths.cache_file.as_ref().filter(|_| use_cache);
    if let Some(path) = cache_file {
        concretizer = concretizer.with_cache(ConcreteCache::open(path, &registry.digest())?);
    }

    let concrete = match concretizer.concretize(&request) {
        Ok(concrete) => concrete,
        Err(e) => {
            let rejected = e.rejected();
            if !rejected.is_empty() {
                eprintln!("Rejected candidates:\n{}", explain(rejected));
            }
            return Err(e).with_context(|| format!("Failed to concretize '{}'", text));
        }
    };

    if let Some(cache) = concretizer.cache() {
        cache.save()?;
    }
    info!("Concretized {}", concrete);
    Ok(concrete)
}

fn cmd_info(registry: &RecipeRegistry, package: &str) -> Result<()> {
    let recipe = registry.lookup(package)?;

    println!("{}", recipe.name);
    if let Some(description) = &recipe.description {
        println!("  {}", description);
    }
    if let Some(homepage) = &recipe.homepage {
        println!("  Homepage: {}", homepage);
    }
    if let Some(git) = &recipe.git {
        println!("  Git: {}", git);
    }

    println!("\nVersions:");
    for decl in &recipe.versions {
        let mut line = format!("  {}", decl.version);
        if let Some(source) = &decl.source {
            line.push_str(&format!("  ({})", source));
        }
        if decl.preferred {
            line.push_str("  [preferred]");
        }
        if decl.deprecated {
            line.push_str("  [deprecated]");
        }
        println!("{}", line);
    }

    if !recipe.variants.is_empty() {
        println!("\nVariants:");
        for def in &recipe.variants {
            let mut line = format!("  {:<20} default={}", def.name, def.default);
            if !def.values.is_empty() {
                line.push_str(&format!("  values={}", def.values.join(",")));
            }
            println!("{}", line);
            if !def.description.is_empty() {
                println!("      {}", def.description);
            }
        }
    }

    if !recipe.dependencies.is_empty() {
        println!("\nDependencies:");
        for rule in &recipe.dependencies {
            let mut line = format!("  {}  [{}]", rule.requirement(), rule.types);
            if !rule.when.is_always() {
                line.push_str(&format!("  when {}", rule.when));
            }
            println!("{}", line);
        }
    }

    if !recipe.conflicts.is_empty() {
        println!("\nConflicts:");
        for rule in &recipe.conflicts {
            println!("  {}", rule.describe());
        }
    }

    Ok(())
}
