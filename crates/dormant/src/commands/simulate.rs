//! Simulate command - drive a shopping-cart workload through the cache.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use dormant_cache::{
    CacheStats, Error as CacheError, HookError, HookResult, Lifecycle, SessionBean, SessionKey,
    StatefulCache, TracingInterceptor,
};
use dormant_config::{CacheSection, DormantConfig};

use super::Context;

/// Arguments for the simulate command.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of sessions to create
    #[arg(short, long, default_value_t = 100)]
    pub sessions: usize,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 8)]
    pub workers: usize,

    /// Business calls per worker
    #[arg(short, long, default_value_t = 1_000)]
    pub calls: usize,

    /// Percentage of calls that end by removing the session
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub remove_percent: u8,

    /// Seed for session selection (random if omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override [cache] max_size
    #[arg(long)]
    pub max_size: Option<usize>,

    /// Override [cache] idle_timeout_ms
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Block up to this many milliseconds when the cache is full
    #[arg(long)]
    pub block_timeout_ms: Option<u64>,

    /// Passivate every idle session before exiting
    #[arg(long)]
    pub drain: bool,
}

impl SimulateArgs {
    fn overrides(&self) -> DormantConfig {
        DormantConfig {
            cache: Some(CacheSection {
                max_size: self.max_size,
                idle_timeout_ms: self.idle_timeout_ms,
                block_on_full: self.block_timeout_ms.map(|_| true),
                block_timeout_ms: self.block_timeout_ms,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo bean
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cart {
    pub customer: String,
    pub items: Vec<LineItem>,
    /// Completed business calls.
    pub calls: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
}

/// Shopping cart per customer.
pub struct ShoppingCartBean;

impl SessionBean for ShoppingCartBean {
    type State = Cart;
    type InitArgs = String;

    fn instantiate(&self, _key: &SessionKey, customer: String) -> Result<Cart, HookError> {
        Ok(Cart {
            customer,
            ..Default::default()
        })
    }

    fn post_invoke(&self, _key: &SessionKey, cart: &mut Cart) -> HookResult {
        cart.calls += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workload
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome counts across all workers.
#[derive(Debug, Clone, Default, Serialize)]
struct CallTally {
    completed: u64,
    in_use: u64,
    capacity: u64,
    not_found: u64,
    removed: u64,
    failed: u64,
}

impl CallTally {
    fn absorb(&mut self, other: CallTally) {
        self.completed += other.completed;
        self.in_use += other.in_use;
        self.capacity += other.capacity;
        self.not_found += other.not_found;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs, ctx: &Context) -> Result<()> {
    let mut layer = ctx.layer.clone();
    layer.merge(args.overrides());
    let resolved = layer.resolve().context("invalid cache settings")?;

    let store = ctx.open_store()?;
    let lifecycle = Lifecycle::new(ShoppingCartBean).with_interceptor(TracingInterceptor);
    let config = super::cache_config(&resolved.cache);
    let cache = StatefulCache::with_lifecycle(config, lifecycle, store);
    let sweeper = cache.config().idle_timeout.map(|_| cache.start_sweeper());

    info!(
        sessions = args.sessions,
        workers = args.workers,
        calls = args.calls,
        max_size = cache.config().max_size,
        store = %ctx.config.store.kind,
        "Starting simulation"
    );
    let started = Instant::now();

    let keys = {
        let cache = cache.clone();
        let count = args.sessions;
        tokio::task::spawn_blocking(move || {
            (0..count)
                .map(|i| cache.create(format!("customer-{i}")))
                .collect::<dormant_cache::Result<Vec<SessionKey>>>()
        })
        .await?
        .context("failed to create sessions")?
    };
    let keys = Arc::new(keys);

    let base_seed = args.seed.unwrap_or_else(rand::random);
    let mut handles = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let cache = cache.clone();
        let keys = Arc::clone(&keys);
        let calls = args.calls;
        let remove_percent = args.remove_percent;
        let seed = base_seed.wrapping_add(worker as u64);
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(&cache, &keys, calls, remove_percent, seed)
        }));
    }

    let mut tally = CallTally::default();
    for handle in handles {
        tally.absorb(handle.await.context("worker panicked")?);
    }

    if args.drain {
        let cache = cache.clone();
        let report = tokio::task::spawn_blocking(move || cache.passivate_all()).await?;
        debug!(passivated = report.passivated, failed = report.failed, "Drained cache");
    }
    if let Some(sweeper) = sweeper {
        sweeper.stop();
    }

    let elapsed = started.elapsed();
    let stats = cache.stats();
    info!(elapsed_ms = elapsed.as_millis() as u64, "Simulation finished");

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "elapsed_ms": elapsed.as_millis() as u64,
                "seed": base_seed,
                "store": ctx.config.store.kind.to_string(),
                "calls": tally,
                "stats": stats,
            }))?
        );
    } else {
        print_summary(&tally, &stats, elapsed, base_seed, ctx);
    }

    Ok(())
}

fn run_worker(
    cache: &StatefulCache<ShoppingCartBean>,
    keys: &[SessionKey],
    calls: usize,
    remove_percent: u8,
    seed: u64,
) -> CallTally {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tally = CallTally::default();
    if keys.is_empty() {
        return tally;
    }

    for _ in 0..calls {
        let key = keys[rng.random_range(0..keys.len())];
        match cache.get(&key) {
            Ok(mut cart) => {
                cart.items.push(LineItem {
                    sku: format!("sku-{}", rng.random_range(0..500)),
                    quantity: rng.random_range(1..=3),
                });
                if let Err(e) = cart.finish() {
                    debug!(key = %key, error = %e, "Finish failed");
                    tally.failed += 1;
                    continue;
                }
                tally.completed += 1;

                if rng.random_range(0..100u8) < remove_percent {
                    match cache.remove(&key) {
                        Ok(()) => tally.removed += 1,
                        Err(e) => {
                            debug!(key = %key, error = %e, "Remove failed");
                            tally.failed += 1;
                        }
                    }
                }
            }
            Err(CacheError::InUse(_)) => tally.in_use += 1,
            Err(CacheError::Capacity(_)) => tally.capacity += 1,
            Err(CacheError::NotFound(_)) => tally.not_found += 1,
            Err(e) => {
                debug!(key = %key, error = %e, "Call failed");
                tally.failed += 1;
            }
        }
    }

    tally
}

fn print_summary(
    tally: &CallTally,
    stats: &CacheStats,
    elapsed: std::time::Duration,
    seed: u64,
    ctx: &Context,
) {
    let dim = Style::new().dim();

    println!("{}", style("Simulation Complete").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Elapsed:      {:.1?}", elapsed);
    println!("  Store:        {}", style(ctx.config.store.kind).cyan());
    if ctx.verbose {
        println!("  Seed:         {}", seed);
    }
    println!();

    println!("{}", style("Calls").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Completed:    {}", style(tally.completed).green());
    println!("  In use:       {}", tally.in_use);
    println!("  Not found:    {}", tally.not_found);
    println!("  Removed:      {}", tally.removed);
    if tally.capacity > 0 {
        println!("  Capacity:     {}", Style::new().yellow().apply_to(tally.capacity));
    }
    if tally.failed > 0 {
        println!("  Failed:       {}", Style::new().red().apply_to(tally.failed));
    }
    println!();

    println!("{}", style("Cache Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!(
        "  Resident:     {} / {}",
        style(stats.resident).cyan(),
        stats.max_size
    );
    println!("  Idle:         {}", stats.available);
    println!("  In use:       {}", stats.in_use);
    println!("  Created:      {}", stats.created);
    println!("  Activated:    {}", stats.activated);
    println!("  Passivated:   {}", stats.passivated);
    println!("  Removed:      {}", stats.removed);
    if stats.passivation_failures > 0 {
        println!(
            "  Pass. fails:  {}",
            Style::new().red().apply_to(stats.passivation_failures)
        );
    }
    println!();
}
