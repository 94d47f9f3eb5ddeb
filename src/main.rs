use std::io::Read;
use std::path::PathBuf;
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};

use promptbatch::config::{
  ModelParameters, PersistConfig, ProviderConfig,
  DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
};
use promptbatch::{
  BatchOutcome, BatchRequest, CancelToken, Dispatcher, GeminiClient,
  GeminiModel, Model, ModelClient, OpenAiClient, OutputTarget,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderKind
{   Openai
  , Gemini
}

#[derive(Parser, Debug)]
#[command(
  name = "promptbatch",
  version,
  about = "Send a batch of prompts to an LLM provider and save the \
           replies as CSV"
)]
struct Cli
{   #[arg(long, value_enum, default_value_t = ProviderKind::Openai)]
    provider: ProviderKind
  , #[arg(long)]
    model: String
  , /// System instruction sent with every prompt
    #[arg(long)]
    system: Option<String>
  , /// Run prompts through the worker pool instead of in order
    #[arg(long)]
    concurrent: bool
  , #[arg(long)]
    output_name: Option<String>
  , #[arg(long)]
    output_dir: Option<PathBuf>
  , /// Write one row of prompts and one row of replies
    #[arg(long)]
    transpose: bool
  , #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize
  , #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32
  , #[arg(long, default_value_t = DEFAULT_TOP_P)]
    top_p: f32
  , #[arg(long)]
    stream: bool
  , /// Only check that the provider answers
    #[arg(long)]
    test_call: bool
  , #[arg(long)]
    api_base: Option<String>
  , #[arg(long)]
    timeout_secs: Option<u64>
  , /// File with one prompt per line, or `-` for stdin
    prompts: Option<PathBuf>
}

#[tokio::main]
async fn main()
{   env_logger::Builder::from_env(
      env_logger::Env::default().default_filter_or("info")
    ).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await
    {   error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> promptbatch::Result<()>
{   let provider_config = ProviderConfig
    {   api_base: cli.api_base.clone()
      , timeout_secs: cli.timeout_secs
    };

    match cli.provider
    {   ProviderKind::Openai => {
          let model: Model = cli.model.parse()?;
          let client = OpenAiClient::from_env(&provider_config)?;
          drive(client, model, &cli).await
        }
      , ProviderKind::Gemini => {
          let model = GeminiModel::new(cli.model.as_str())?;
          let client = GeminiClient::from_env(&provider_config)?;
          drive(client, model, &cli).await
        }
    }
}

async fn drive<C: ModelClient>(
  client: C
, model: C::Model
, cli: &Cli
) -> promptbatch::Result<()>
{   if cli.test_call
    {   let ok = promptbatch::providers::test_call(&client, &model).await?;
        println!("{}", if ok { "ok" } else { "unexpected reply" });
        return Ok(());
    }

    let prompts = read_prompts(cli.prompts.as_ref())?;
    let dispatcher = Dispatcher::new(client)
      .with_parameters(ModelParameters::new(
        cli.max_tokens,
        cli.temperature,
        cli.top_p,
        cli.stream
      ))
      .with_persist_config(PersistConfig
      {   transpose: cli.transpose
        , ..PersistConfig::default()
      });

    let mut request = BatchRequest::new(model, prompts);
    if let Some(system) = &cli.system
    {   request = request.with_system_prompt(system.clone());
    }
    if let Some(name) = &cli.output_name
    {   let mut target = OutputTarget::new(name.clone());
        target.dir = cli.output_dir.clone();
        request = request.with_output(target);
    } else if cli.output_dir.is_some()
    {   warn!("--output-dir given without --output-name; not saving");
    }

    let outcome = if cli.concurrent
    {   let cancel = CancelToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
          if tokio::signal::ctrl_c().await.is_ok()
          {   warn!("Interrupted; letting in-flight prompts finish");
              on_signal.cancel();
          }
        });
        dispatcher.run_concurrent(request, &cancel).await?
    } else
    {   dispatcher.run_sequential(request).await?
    };

    report(&outcome);
    Ok(())
}

fn read_prompts(source: Option<&PathBuf>) -> promptbatch::Result<Vec<String>>
{   let text = match source
    {   Some(path) if path.as_os_str() != "-" => {
          debug!("Reading prompts from {}", path.display());
          std::fs::read_to_string(path)?
        }
      , _ => {
          debug!("Reading prompts from stdin");
          let mut buf = String::new();
          std::io::stdin().read_to_string(&mut buf)?;
          buf
        }
    };

    let prompts: Vec<String> = text.lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(str::to_string)
      .collect();
    info!("Loaded {} prompts", prompts.len());
    Ok(prompts)
}

fn report(outcome: &BatchOutcome)
{   for result in &outcome.results
    {   println!("> {}", result.prompt);
        for reply in &result.reply
        {   println!("{}\n", reply);
        }
    }
    for failure in &outcome.failures
    {   eprintln!("failed #{} {:?}: {}",
          failure.index, failure.prompt, failure.error
        );
    }
    match &outcome.saved_to
    {   Some(Ok(path)) => info!("Saved to {}", path.display())
      , Some(Err(e)) => eprintln!("not saved: {}", e)
      , None => {}
    }
}
