mod progress;

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use colored::*;
use indicatif::ProgressBar;

use credstorm_core::{
    prepare_pending, read_lines, AttackConfig, AttackEngine, ControlPort, ResponseMatcher,
    ThrottleMode,
};

use crate::progress::{new_bar, BarWriter, ProgressSink};

#[derive(Parser, Debug)]
#[command(
    name = "credstorm",
    version,
    about = "Adaptive HTTP login auditing tool for authorized testing",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Form login:           credstorm -u http://lab.local/login -U users.txt -P pass.txt -d \"user=^USER^&pass=^PASS^\" --fail \"Invalid\"
  JSON login:           credstorm -u http://lab.local/api/login -U users.txt -P pass.txt -d '{\"u\":\"^USER^\",\"p\":\"^PASS^\"}' -H \"Content-Type: application/json\" --success token
  With CSRF token:      credstorm -u http://lab.local/login -U users.txt -P pass.txt -d \"u=^USER^&p=^PASS^&t=^CSRF^\" --csrffield t --fail Invalid
  Through Burp:         credstorm ... --proxy http://127.0.0.1:8080
  Rotating identity:    credstorm ... --tor
  Count pending pairs:  credstorm ... --dry-run"
)]
pub struct Args {
    #[arg(short = 'u', long, help = "Target login URL")]
    pub url: Option<String>,

    #[arg(short = 'm', long, default_value = "POST", help = "HTTP method")]
    pub method: String,

    #[arg(short = 'U', long, help = "Username wordlist file")]
    pub users: PathBuf,

    #[arg(short = 'P', long, help = "Password wordlist file")]
    pub passwords: PathBuf,

    #[arg(short = 't', long, default_value_t = 10, help = "Number of concurrent workers")]
    pub threads: usize,

    #[arg(long, default_value_t = 5000, help = "Initial requests-per-minute ceiling")]
    pub threshold: u32,

    #[arg(short = 'd', long, help = "Payload template with ^USER^, ^PASS^ and optional ^CSRF^")]
    pub payload: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Cookie: sess=abc\")")]
    pub headers: Vec<String>,

    #[arg(long = "csrffield", help = "Name of the hidden CSRF input field")]
    pub csrf_field: Option<String>,

    #[arg(long = "csrfsource", help = "Page holding the CSRF token (defaults to the target URL)")]
    pub csrf_source: Option<String>,

    #[arg(long, conflicts_with = "fail", help = "Keyword present only after a successful login")]
    pub success: Option<String>,

    #[arg(long, help = "Keyword present whenever the login is rejected")]
    pub fail: Option<String>,

    #[arg(
        long = "throttle-codes",
        value_delimiter = ',',
        default_value = "429",
        help = "Comma-separated status codes treated as rate limiting"
    )]
    pub throttle_codes: Vec<u16>,

    #[arg(long, help = "Append log records to this file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080 or socks5h://127.0.0.1:9050)")]
    pub proxy: Option<String>,

    #[arg(long, visible_alias = "anonymity", conflicts_with = "no_limit", help = "Route through the local anonymity network and rotate identity when throttled")]
    pub tor: bool,

    #[arg(long, help = "Disable pacing and backoff entirely")]
    pub no_limit: bool,

    #[arg(long, default_value_t = 3, help = "Retries per pair after throttling or network errors")]
    pub retry_limit: u32,

    #[arg(long, default_value_t = 2, help = "Number of retry workers")]
    pub retry_threads: usize,

    #[arg(long, default_value_t = 30, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(long, help = "Directory for resume state (default ~/.credstorm)")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "Report how many pairs are pending without sending anything")]
    pub dry_run: bool,

    #[arg(short = 'v', long, help = "Verbose logging")]
    pub verbose: bool,
}

impl Args {
    fn to_config(&self) -> AttackConfig {
        let matcher = match (&self.success, &self.fail) {
            (Some(kw), _) => ResponseMatcher::Success(kw.clone()),
            (None, Some(kw)) => ResponseMatcher::Fail(kw.clone()),
            (None, None) => ResponseMatcher::default(),
        };
        let throttle_mode = if self.tor {
            ThrottleMode::Anonymity
        } else if self.no_limit {
            ThrottleMode::NoLimit
        } else {
            ThrottleMode::Standard
        };

        let mut config = AttackConfig {
            url: self.url.clone().unwrap_or_default(),
            method: self.method.clone(),
            payload: self.payload.clone().unwrap_or_default(),
            headers: self.headers.clone(),
            csrf_field: self.csrf_field.clone(),
            csrf_source: self.csrf_source.clone(),
            matcher,
            throttle_codes: self.throttle_codes.clone(),
            threads: self.threads,
            retry_threads: self.retry_threads,
            retry_limit: self.retry_limit,
            threshold: self.threshold,
            timeout: self.timeout,
            proxy: self.proxy.clone(),
            throttle_mode,
            state_dir: self.state_dir.clone(),
            ..AttackConfig::default()
        };
        config.apply_defaults();
        config
    }
}

fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    print_banner();

    let bar = new_bar();
    if let Err(e) = init_logging(&args, &bar) {
        fail(&format!("Failed to set up logging: {:#}", e));
    }

    let config = args.to_config();
    if let Err(e) = config.validate() {
        fail(&format!("{:#}", e));
    }

    let users = load_wordlist(&args.users, "users");
    let passwords = load_wordlist(&args.passwords, "passwords");

    if config.throttle_mode == ThrottleMode::Anonymity {
        let control = ControlPort::new(config.rotation.control_addr.clone());
        if let Err(e) = control.probe() {
            fail(&format!("Anonymity mode requires a reachable control port: {}", e));
        }
        print!("{}\r\n", format!("[+] Control port {} is ready", control.addr()).green());
    }

    let (store, pending) = match prepare_pending(&config, &users, &passwords) {
        Ok(v) => v,
        Err(e) => fail(&format!("Failed to load state: {:#}", e)),
    };

    let total = distinct(&users) * distinct(&passwords);
    print!(
        "{}\r\n",
        format!(
            "[+] {} of {} pair(s) pending (state: {})",
            pending.len(),
            total,
            store.dir().display()
        )
        .green()
        .bold()
    );
    std::io::stdout().flush().ok();

    if pending.is_empty() {
        fail("All combinations were already attempted for this target.");
    }

    if args.dry_run {
        print!("{}\r\n", format!("[DRY RUN] Would attempt {} pair(s) against {}", pending.len(), config.url).cyan());
        return;
    }

    print_attack_config(&config, &args);

    let sink = ProgressSink::new_ref(bar, pending.len(), args.log_file.is_some());
    let engine = match AttackEngine::new(config, store, sink) {
        Ok(engine) => engine,
        Err(e) => fail(&format!("Failed to initialize attack: {:#}", e)),
    };

    match engine.run(pending) {
        Ok(stats) => {
            print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
            print!(
                "{}\r\n",
                format!("[+] Found {} valid credential(s)", stats.found()).green().bold()
            );
            print!(
                "{}\r\n",
                format!(
                    "[*] Attempted: {}  Errors: {}  Retries: {}  Abandoned: {}",
                    stats.attempted(),
                    stats.errors(),
                    stats.retries(),
                    stats.abandoned()
                )
                .blue()
            );
            std::io::stdout().flush().ok();
        }
        Err(e) => fail(&format!("Attack failed: {:#}", e)),
    }
}

fn fail(message: &str) -> ! {
    eprint!("{}\r\n", format!("[!] {}", message).red());
    process::exit(1);
}

/// `RUST_LOG` wins; otherwise warnings only, info with a log file, debug with
/// `-v`. With a log file, records go there instead of the terminal; otherwise
/// they go to stderr around the progress bar.
fn init_logging(args: &Args, bar: &ProgressBar) -> anyhow::Result<()> {
    let default_level = match (args.verbose, args.log_file.is_some()) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if let Some(ref path) = args.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    } else {
        let writer = BarWriter::new(bar.clone(), io::stderr());
        builder.target(env_logger::Target::Pipe(Box::new(writer)));
    }

    builder.try_init()?;
    Ok(())
}

fn distinct(lines: &[String]) -> usize {
    lines.iter().collect::<HashSet<_>>().len()
}

fn load_wordlist(path: &Path, label: &str) -> Vec<String> {
    match read_lines(path) {
        Ok(lines) if lines.is_empty() => fail(&format!("The {} list '{}' is empty", label, path.display())),
        Ok(lines) => {
            print!(
                "{}\r\n",
                format!("[+] Loaded {} {} from {}", lines.len(), label, path.display()).green()
            );
            lines
        }
        Err(e) => fail(&format!("Failed to read '{}': {}", path.display(), e)),
    }
}

fn print_banner() {
    let banner = r#"
   ___ ___ ___ ___  ___ _____ ___  ___ __  __
  / __| _ \ __|   \/ __|_   _/ _ \| _ \  \/  |
 | (__|   / _|| |) \__ \ | || (_) |   / |\/| |
  \___|_|_\___|___/|___/ |_| \___/|_|_\_|  |_|
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_attack_config(config: &AttackConfig, args: &Args) {
    let mode_label = match config.throttle_mode {
        ThrottleMode::Standard => format!("Adaptive ({} RPM start)", config.threshold),
        ThrottleMode::NoLimit => "No limit".to_string(),
        ThrottleMode::Anonymity => "Identity rotation".to_string(),
    };
    let matcher_label = match config.matcher {
        ResponseMatcher::Success(ref kw) => format!("success contains \"{}\"", kw),
        ResponseMatcher::Fail(ref kw) => format!("fail contains \"{}\"", kw),
    };

    print!("{}\r\n", format!("[+] Target:     {} {}", config.method, config.url).green().bold());
    print!("{}\r\n", format!("[+] Threads:    {} (+{} retry)", config.threads, config.retry_threads).blue());
    print!("{}\r\n", format!("[+] Timeout:    {}s", config.timeout).blue());
    print!("{}\r\n", format!("[+] Throttle:   {}", mode_label).magenta().bold());
    print!("{}\r\n", format!("[+] Matcher:    {}", matcher_label).magenta());
    if let Some(proxy) = config.proxy_ref() {
        print!("{}\r\n", format!("[+] Proxy:      {}", proxy).yellow());
    }
    if let Some(field) = config.csrf_field_ref() {
        print!("{}\r\n", format!("[+] CSRF field: {}", field).yellow());
    }
    if !args.headers.is_empty() {
        print!("{}\r\n", format!("[+] Headers:    {} custom", args.headers.len()).yellow());
    }
    if let Some(ref path) = args.log_file {
        print!("{}\r\n", format!("[+] Log file:   {}", path.display()).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}
