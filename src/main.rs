//! NeuronOS CLI: local agent runtime.
//!
//! Exit codes: 0 success, 1 user error, 2 engine failure, 3 agent step
//! budget exhausted.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use neuronos::agent::{Agent, AgentConfig, AgentStatus, StepEvent};
use neuronos::engine::{Engine, EngineOptions, GenParams, ScriptedEngine};
use neuronos::error::NeuronError;
use neuronos::hal;
use neuronos::hw;
use neuronos::memory::MemoryStore;
use neuronos::paths::InstallPaths;
use neuronos::registry;
use neuronos::tools::{Caps, ToolRegistry};

#[derive(Parser)]
#[command(name = "neuronos", version, about = "Local agent runtime")]
struct Cli {
    /// Number of threads (0 = auto).
    #[arg(short = 't', long, global = true, default_value = "0")]
    threads: usize,

    /// Max tokens to generate.
    #[arg(short = 'n', long, global = true, default_value = "256")]
    max_tokens: usize,

    /// Max agent steps.
    #[arg(short = 's', long, global = true, default_value = "10")]
    max_steps: usize,

    /// Sampling temperature.
    #[arg(long = "temp", global = true, default_value = "0.7")]
    temperature: f32,

    /// GBNF grammar file for generation.
    #[arg(long, global = true)]
    grammar: Option<PathBuf>,

    /// Models search directory.
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    /// Show debug info.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect hardware and select a kernel backend.
    Hwinfo,

    /// Scan a directory for GGUF models and rank them.
    Scan {
        /// Directory to scan (defaults to the install models dir).
        dir: Option<PathBuf>,
    },

    /// Auto-select the best model for this machine, then run.
    Auto {
        #[arg(value_enum)]
        action: AutoAction,
        prompt: String,
    },

    /// Operate on a specific model file.
    Model {
        path: PathBuf,
        #[arg(value_enum)]
        action: ModelAction,
        prompt: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AutoAction {
    Generate,
    Agent,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelAction {
    Info,
    Generate,
    Agent,
    Chat,
}

/// Map a terminal error to its exit code (engine failures are 2, the rest
/// are user errors).
fn exit_code_for(err: &NeuronError) -> u8 {
    match err {
        NeuronError::Engine(_) => 2,
        NeuronError::Agent(neuronos::agent::AgentError::Engine(_)) => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            let code = exit_code_for(&err);
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<u8, NeuronError> {
    if cli.threads > 0 {
        // The engine owns its thread pool; the flag is recorded for it.
        tracing::debug!(threads = cli.threads, "thread count override");
    }
    match cli.command {
        Commands::Hwinfo => cmd_hwinfo(),
        Commands::Scan { ref dir } => {
            let dir = resolve_models_dir(dir.clone(), cli.models.clone())?;
            cmd_scan(&dir)
        }
        Commands::Auto { action, ref prompt } => {
            let dir = resolve_models_dir(None, cli.models.clone())?;
            let hardware = hw::detect();
            let models = registry::scan(&dir, &hardware)?;
            if models.is_empty() {
                return Err(neuronos::error::RegistryError::NoModels {
                    path: dir.display().to_string(),
                }
                .into());
            }
            let best = registry::select_best(&models).ok_or(
                neuronos::error::RegistryError::NoFit {
                    budget_mb: hardware.model_budget_mb,
                },
            )?;
            eprintln!("auto-selected: {} (score {:.1})", best.name, best.score);
            let mut engine = load_engine(&best.path)?;
            match action {
                AutoAction::Generate => cmd_generate(&mut engine, &cli, prompt),
                AutoAction::Agent => cmd_agent(&mut engine, &cli, prompt),
            }
        }
        Commands::Model {
            ref path,
            action,
            ref prompt,
        } => {
            let mut engine = load_engine(path)?;
            match action {
                ModelAction::Info => cmd_info(&engine),
                ModelAction::Generate => cmd_generate(&mut engine, &cli, require_prompt(prompt)?),
                ModelAction::Agent => cmd_agent(&mut engine, &cli, require_prompt(prompt)?),
                ModelAction::Chat => cmd_chat(&mut engine, &cli),
            }
        }
    }
}

fn require_prompt(prompt: &Option<String>) -> Result<&str, NeuronError> {
    prompt.as_deref().ok_or_else(|| NeuronError::InvalidArgument {
        message: "a PROMPT argument is required for this action".into(),
    })
}

fn resolve_models_dir(
    arg: Option<PathBuf>,
    flag: Option<PathBuf>,
) -> Result<PathBuf, NeuronError> {
    if let Some(dir) = arg.or(flag) {
        return Ok(dir);
    }
    let paths = InstallPaths::resolve()?;
    Ok(paths.models_dir)
}

fn load_engine(path: &std::path::Path) -> Result<ScriptedEngine, NeuronError> {
    Ok(ScriptedEngine::load(path, EngineOptions::default())?)
}

fn cmd_hwinfo() -> Result<u8, NeuronError> {
    let hardware = hw::detect();
    println!("NeuronOS hardware detection v{}", neuronos::VERSION);
    println!("  CPU:      {}", hardware.cpu_name);
    println!("  Arch:     {}", hardware.arch);
    println!(
        "  Cores:    {} physical / {} logical",
        hardware.physical_cores, hardware.logical_cores
    );
    println!(
        "  RAM:      {} MB total / {} MB available",
        hardware.ram_total_mb, hardware.ram_available_mb
    );
    println!("  Budget:   {} MB for models", hardware.model_budget_mb);
    if hardware.gpu_vram_mb > 0 {
        println!("  GPU:      {} ({} MB)", hardware.gpu_name, hardware.gpu_vram_mb);
    } else {
        println!("  GPU:      none detected (CPU-only)");
    }
    println!("  Features: {}", hardware.features);

    let backend = hal::select_backend(hardware.features)?;
    println!("  Backend:  {}", backend.name());
    hal::shutdown_backend();

    // Best-effort profile persistence for installers and support tooling.
    if let Ok(paths) = InstallPaths::resolve() {
        if paths.ensure_dirs().is_ok() {
            if let Err(e) = hardware.save(&paths.hw_profile) {
                tracing::warn!(error = %e, "could not persist hw_profile.json");
            }
        }
    }
    Ok(0)
}

fn cmd_scan(dir: &std::path::Path) -> Result<u8, NeuronError> {
    let hardware = hw::detect();
    eprintln!("scanning: {}", dir.display());
    eprintln!("RAM budget: {} MB\n", hardware.model_budget_mb);

    let models = registry::scan(dir, &hardware)?;
    if models.is_empty() {
        eprintln!("no .gguf models found in {}", dir.display());
        return Ok(1);
    }

    println!(
        "{:<4} {:<40} {:>8} {:>8} {:>10} {:>8}  {}",
        "Rank", "Name", "Size MB", "RAM MB", "Params", "Score", "Fits?"
    );
    for (i, m) in models.iter().enumerate() {
        println!(
            "{:<4} {:<40.40} {:>8} {:>8} {:>9}M {:>8.1}  {}",
            i + 1,
            m.name,
            m.file_size_mb,
            m.est_ram_mb,
            m.est_params / 1_000_000,
            m.score,
            if m.fits_in_ram { "YES" } else { "NO" }
        );
    }

    if let Some(best) = registry::select_best(&models) {
        println!("\nbest model: {} (score {:.1})", best.name, best.score);
        println!("  path: {}", best.path.display());
    }
    Ok(0)
}

fn cmd_info(engine: &ScriptedEngine) -> Result<u8, NeuronError> {
    let info = engine.info();
    if let Some(path) = engine.model_path() {
        println!("model:    {}", path.display());
    }
    println!("params:   ~{}M", info.n_params / 1_000_000);
    println!("size:     {} MB", info.model_size / (1024 * 1024));
    println!("context:  {} tokens", info.n_ctx_train);
    Ok(0)
}

fn cmd_generate(engine: &mut ScriptedEngine, cli: &Cli, prompt: &str) -> Result<u8, NeuronError> {
    let grammar = match &cli.grammar {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
            NeuronError::InvalidArgument {
                message: format!("cannot read grammar file {}: {e}", path.display()),
            }
        })?),
        None => None,
    };

    let mut stream = |chunk: &str| {
        print!("{chunk}");
        let _ = std::io::stdout().flush();
        true
    };
    let mut params = GenParams::new(prompt);
    params.max_tokens = cli.max_tokens;
    params.temperature = cli.temperature;
    params.grammar = grammar.as_deref();
    params.on_token = Some(&mut stream);

    let result = engine.generate(params).map_err(NeuronError::from)?;
    println!();
    if cli.verbose {
        eprintln!(
            "[{} tokens, {:.1} ms, {:.2} t/s]",
            result.n_tokens, result.elapsed_ms, result.tokens_per_s
        );
    }
    Ok(0)
}

fn agent_config(cli: &Cli, engine: &ScriptedEngine, paths: &InstallPaths) -> AgentConfig {
    AgentConfig {
        max_steps: cli.max_steps,
        max_tokens_per_step: cli.max_tokens,
        temperature: cli.temperature,
        context_capacity: engine.context_size(),
        granted_caps: Caps::FILESYSTEM.with(Caps::MEMORY),
        scratch_dir: Some(paths.scratch_dir.clone()),
        ..AgentConfig::default()
    }
}

fn print_step(step: &StepEvent) {
    eprintln!("\n── step {} ──", step.step + 1);
    if !step.thought.is_empty() {
        eprintln!("  thought: {}", step.thought);
    }
    eprintln!("  action:  {}", step.action_json);
    if let Some(obs) = &step.observation {
        let shown: String = obs.chars().take(200).collect();
        eprintln!(
            "  observe: {shown}{}",
            if obs.len() > shown.len() { "..." } else { "" }
        );
    }
}

fn cmd_agent(engine: &mut ScriptedEngine, cli: &Cli, task: &str) -> Result<u8, NeuronError> {
    let paths = InstallPaths::resolve()?;
    paths.ensure_dirs()?;
    let memory = Arc::new(MemoryStore::open(&paths.memory_db)?);

    let mut tools = ToolRegistry::new();
    let config = agent_config(cli, engine, &paths);
    tools.register_defaults(config.granted_caps)?;

    eprintln!("NeuronOS agent v{}", neuronos::VERSION);
    eprintln!("task: {task}");
    eprintln!("tools: {} registered", tools.len());

    let mut agent = Agent::new(engine, tools, memory, config);
    let mut on_step = |step: &StepEvent| print_step(step);
    let outcome = agent.run(task, Some(&mut on_step)).map_err(NeuronError::from)?;

    match outcome.status {
        AgentStatus::Final => {
            println!("\n══ answer ══\n{}", outcome.answer.as_deref().unwrap_or(""));
            if cli.verbose {
                eprintln!("[{} steps, {:.1} ms]", outcome.steps, outcome.elapsed_ms);
            }
            Ok(0)
        }
        AgentStatus::StepBudgetExhausted => {
            eprintln!(
                "\nagent stopped: step budget exhausted after {} steps",
                outcome.steps
            );
            if let Some(partial) = outcome.answer {
                println!("best-effort answer:\n{partial}");
            }
            Ok(3)
        }
        AgentStatus::Cancelled => {
            eprintln!("\nagent cancelled after {} steps", outcome.steps);
            Ok(1)
        }
    }
}

fn cmd_chat(engine: &mut ScriptedEngine, cli: &Cli) -> Result<u8, NeuronError> {
    let paths = InstallPaths::resolve()?;
    paths.ensure_dirs()?;
    let memory = Arc::new(MemoryStore::open(&paths.memory_db)?);

    let mut tools = ToolRegistry::new();
    let config = agent_config(cli, engine, &paths);
    tools.register_defaults(config.granted_caps)?;
    let mut agent = Agent::new(engine, tools, memory, config);

    eprintln!("NeuronOS chat v{} — empty line or Ctrl-D exits", neuronos::VERSION);
    let stdin = std::io::stdin();
    loop {
        eprint!("> ");
        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let task = line.trim();
        if task.is_empty() {
            break;
        }
        match agent.run(task, None) {
            Ok(outcome) => println!("{}", outcome.answer.as_deref().unwrap_or("(no answer)")),
            Err(e) => eprintln!("{:?}", miette::Report::new(NeuronError::from(e))),
        }
    }
    Ok(0)
}
