//! Batch dispatcher: runs independent prompts one after another or
//! through a bounded pool of tasks, then hands the pairs to the
//! persister once.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Semaphore};
use log::{debug, error, info, warn};

use crate::config::{ModelParameters, PersistConfig};
use crate::message::{ChatMessage, Conversation, Role};
use crate::persist::TabularPersister;
use crate::providers::ModelClient;
use crate::request::{BatchOutcome, BatchRequest, PromptFailure, QueryResult};

type UnitReply = (usize, crate::error::Result<Vec<String>>);

/// Stops a concurrent batch from submitting more prompts. Prompts
/// already sent are allowed to finish and are still collected.
#[derive(Debug, Clone, Default)]
pub struct CancelToken
{   cancelled: Arc<AtomicBool>
}

impl CancelToken
{   pub fn new() -> Self
    {   CancelToken::default()
    }

    pub fn cancel(&self)
    {   debug!("Batch cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool
    {   self.cancelled.load(Ordering::SeqCst)
    }
}

/// Number of prompts in flight at once in concurrent mode
pub fn default_pool_size() -> usize
{   std::thread::available_parallelism()
      .map(|n| n.get())
      .unwrap_or(4)
      .max(1)
}

/// Front door for single queries and batches against one provider.
///
/// Parameters are fixed at construction; build a new dispatcher to
/// change them.
pub struct Dispatcher<C: ModelClient>
{   client: Arc<C>
  , params: Arc<ModelParameters>
  , persister: TabularPersister
  , pool_size: usize
}

impl<C: ModelClient> Clone for Dispatcher<C>
{   fn clone(&self) -> Self
    {   Dispatcher
        {   client: Arc::clone(&self.client)
          , params: Arc::clone(&self.params)
          , persister: self.persister.clone()
          , pool_size: self.pool_size
        }
    }
}

impl<C: ModelClient> Dispatcher<C>
{   pub fn new(client: C) -> Self
    {   debug!("Creating Dispatcher for {}", client.name());
        Dispatcher
        {   client: Arc::new(client)
          , params: Arc::new(ModelParameters::default())
          , persister: TabularPersister::default()
          , pool_size: default_pool_size()
        }
    }

    /// Replace the sampling parameters used by every later call
    pub fn with_parameters(mut self, params: ModelParameters) -> Self
    {   params.warn_on_conflict();
        self.params = Arc::new(params);
        self
    }

    pub fn with_persist_config(mut self, config: PersistConfig) -> Self
    {   self.persister = TabularPersister::new(config);
        self
    }

    pub fn client(&self) -> &C
    {   &self.client
    }

    pub fn parameters(&self) -> &ModelParameters
    {   &self.params
    }

    pub fn persister(&self) -> &TabularPersister
    {   &self.persister
    }

    pub fn pool_size(&self) -> usize
    {   self.pool_size
    }

    /// One prompt, one round trip
    pub async fn query(
      &self
    , model: &C::Model
    , prompt: &str
    , system_prompt: Option<&str>
    ) -> crate::error::Result<QueryResult>
    {   let messages
          = crate::message::single_prompt(prompt, system_prompt);
        let reply = self.client
          .execute(model, &messages, &self.params)
          .await?;
        Ok(QueryResult::new(prompt, reply))
    }

    /// Send a whole conversation; the result is keyed by the final
    /// user turn
    pub async fn query_conversation(
      &self
    , model: &C::Model
    , conversation: &Conversation
    , system_prompt: Option<&str>
    ) -> crate::error::Result<QueryResult>
    {   let input = crate::message::PromptInput::Conversation(
          conversation.clone()
        );
        let messages: Vec<ChatMessage>
          = crate::message::format_messages(&input, system_prompt)?
            .into_iter()
            .next()
            .unwrap_or_default();
        let prompt = conversation.turns()
          .iter()
          .rev()
          .find(|t| t.role == Role::User)
          .map(|t| t.content.clone())
          .unwrap_or_default();

        let reply = self.client
          .execute(model, &messages, &self.params)
          .await?;
        Ok(QueryResult::new(prompt, reply))
    }

    /// Run prompts in input order. Successful results keep that
    /// order; a failing prompt is logged and reported in
    /// `failures` while the rest of the batch continues.
    pub async fn run_sequential(
      &self
    , request: BatchRequest<C::Model>
    ) -> crate::error::Result<BatchOutcome>
    {   request.validate()?;
        let total = request.prompts.len();
        info!(
          "Running {} prompts sequentially on {} ({})",
          total, self.client.name(), request.model
        );

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, prompt) in request.prompts.iter().enumerate()
        {   let messages = crate::message::single_prompt(
              prompt,
              request.system_prompt.as_deref()
            );
            match self.client
              .execute(&request.model, &messages, &self.params)
              .await
            {   Ok(reply) => {
                  results.push(QueryResult::new(
                    request.label_for(index),
                    reply
                  ));
                }
              , Err(e) => {
                  error!("Prompt {:?} failed: {}", prompt, e);
                  failures.push(PromptFailure
                  {   index
                    , prompt: prompt.clone()
                    , error: e
                  });
                }
            }
            info!("{}/{}", index + 1, total);
        }

        Ok(self.finish(&request, results, failures).await)
    }

    /// Run every prompt as its own task, at most `pool_size` at a
    /// time. Results arrive in completion order; each stays paired
    /// with the prompt that produced it. A failing prompt costs
    /// exactly one result and never stops its siblings.
    pub async fn run_concurrent(
      &self
    , request: BatchRequest<C::Model>
    , cancel: &CancelToken
    ) -> crate::error::Result<BatchOutcome>
    {   request.validate()?;
        let total = request.prompts.len();
        info!(
          "Running {} prompts concurrently on {} ({}), pool size {}",
          total, self.client.name(), request.model, self.pool_size
        );

        let request = Arc::new(request);
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<UnitReply>();

        let collector = tokio::spawn(
          collect_replies(reply_rx, Arc::clone(&request), total)
        );

        let mut workers = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for index in 0..total
        {   let permit = if cancel.is_cancelled()
            {   None
            } else
            {   Arc::clone(&semaphore).acquire_owned().await.ok()
            };
            let permit = match permit
            {   Some(p) if !cancel.is_cancelled() => p
              , _ => {
                  warn!(
                    "Batch cancelled; {} prompts not submitted",
                    total - index
                  );
                  failures.extend(
                    (index..total).map(|i| PromptFailure
                    {   index: i
                      , prompt: request.prompts[i].clone()
                      , error: crate::error::Error::Cancelled
                    })
                  );
                  break;
                }
            };

            let client = Arc::clone(&self.client);
            let params = Arc::clone(&self.params);
            let request = Arc::clone(&request);
            let reply_tx = reply_tx.clone();
            let handle = tokio::spawn(async move {
              let _permit = permit;
              let messages = crate::message::single_prompt(
                &request.prompts[index],
                request.system_prompt.as_deref()
              );
              let result = client
                .execute(&request.model, &messages, &params)
                .await;
              let _ = reply_tx.send((index, result));
            });
            workers.push((index, handle));
        }
        drop(reply_tx);

        let mut panicked = Vec::new();
        for (index, handle) in workers
        {   if let Err(e) = handle.await
            {   error!(
                  "Worker for prompt {:?} did not finish: {}",
                  request.prompts[index], e
                );
                panicked.push(PromptFailure
                {   index
                  , prompt: request.prompts[index].clone()
                  , error: crate::error::Error::Other(
                      format!("worker did not finish: {}", e)
                    )
                });
            }
        }

        let (results, mut reported) = collector.await.map_err(|e| {
          crate::error::Error::Other(
            format!("result collector did not finish: {}", e)
          )
        })?;
        reported.extend(failures);
        reported.extend(panicked);
        reported.sort_by_key(|f| f.index);

        Ok(self.finish(&request, results, reported).await)
    }

    /// Persist once when a target was given, log the outcome and
    /// return everything computed, even if writing failed.
    async fn finish(
      &self
    , request: &BatchRequest<C::Model>
    , results: Vec<QueryResult>
    , failures: Vec<PromptFailure>
    ) -> BatchOutcome
    {   if !failures.is_empty()
        {   warn!(
              "{} of {} prompts failed",
              failures.len(),
              request.prompts.len()
            );
        }

        let saved_to = match &request.output
        {   Some(target) => {
              let persister = self.persister.clone();
              let rows = results.clone();
              let target = target.clone();
              let written = tokio::task::spawn_blocking(move || {
                persister.persist(&rows, &target.name, target.dir.as_deref())
              })
              .await
              .unwrap_or_else(|e| Err(crate::error::Error::Other(
                format!("persist task did not finish: {}", e)
              )));
              if let Err(e) = &written
              {   error!("Could not save batch results: {}", e);
              }
              Some(written)
            }
          , None => None
        };

        BatchOutcome
        {   results
          , failures
          , saved_to
        }
    }
}

/// Single owner of the result list; workers only send to it
async fn collect_replies<M>(
  mut reply_rx: mpsc::UnboundedReceiver<UnitReply>
, request: Arc<BatchRequest<M>>
, total: usize
) -> (Vec<QueryResult>, Vec<PromptFailure>)
{   let mut results = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut seen = HashSet::with_capacity(total);

    while let Some((index, result)) = reply_rx.recv().await
    {   if !seen.insert(index)
        {   warn!("Duplicate reply for prompt {} ignored", index);
            continue;
        }
        match result
        {   Ok(reply) => {
              results.push(QueryResult::new(
                request.label_for(index),
                reply
              ));
            }
          , Err(e) => {
              error!("Prompt {:?} failed: {}", request.prompts[index], e);
              failures.push(PromptFailure
              {   index
                , prompt: request.prompts[index].clone()
                , error: e
              });
            }
        }
        info!("{}/{} replies collected", seen.len(), total);
    }
    (results, failures)
}
