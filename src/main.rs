use std::{
    error::Error,
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gimme_aws_creds::{
    keys, ConfigFile, CredentialSink, CredentialStore, CredsFlowBuilder, Delivered, Lookup,
};

const OKTA_PASSWORD: &str = "OKTA_PASSWORD";

/// Exchange an Okta session for temporary AWS credentials.
///
/// Values given on the command line override `~/.okta_aws_login_config`.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Save the given values to the configuration file and exit.
    #[arg(long)]
    configure: bool,

    /// Configuration file [default: $OKTA_CONFIG or ~/.okta_aws_login_config].
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Base URL of the Okta organization.
    #[arg(long)]
    org_url: Option<String>,

    /// Okta user name.
    #[arg(long, short)]
    username: Option<String>,

    /// AWS application label; chosen interactively when not configured.
    #[arg(long)]
    app: Option<String>,

    /// Role name; chosen interactively when not configured.
    #[arg(long)]
    role: Option<String>,

    /// Name the credentials profile `default` or after the role.
    #[arg(long, value_parser = ["default", "role"])]
    cred_profile: Option<String>,

    /// Write the credentials to the shared credentials file.
    #[arg(long, conflicts_with = "emit")]
    write_aws_creds: bool,

    /// Print the credentials as shell `export` statements.
    #[arg(long)]
    emit: bool,

    /// Requested credential lifetime in seconds.
    #[arg(long)]
    duration: Option<u32>,

    /// Region for the STS call.
    #[arg(long)]
    region: Option<String>,

    /// Fetch the assertion with the first session instead of authenticating again.
    #[arg(long)]
    reuse_session: bool,
}

impl Args {
    fn config_file(&self) -> ConfigFile {
        let mut file = ConfigFile::default();
        if let Some(path) = &self.config_file {
            file = file.with_path(path);
        }

        let values = [
            (keys::ORG_URL, self.org_url.clone()),
            (keys::USERNAME, self.username.clone()),
            (keys::APP_NAME, self.app.clone()),
            (keys::ROLE_NAME, self.role.clone()),
            (keys::CRED_PROFILE, self.cred_profile.clone()),
            (keys::DURATION, self.duration.map(|secs| secs.to_string())),
            (keys::REGION, self.region.clone()),
            (
                keys::WRITE_AWS_CREDS,
                (self.write_aws_creds || self.emit).then(|| self.write_aws_creds.to_string()),
            ),
            (
                keys::REAUTHENTICATE,
                self.reuse_session.then(|| "false".to_string()),
            ),
        ];
        for (key, value) in values {
            if let Some(value) = value {
                file = file.with_value(key, value);
            }
        }
        file
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Into::into)
        .and_then(|runtime| runtime.block_on(run(args)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config_file = args.config_file();

    if args.configure {
        let path = config_file.save().await?;
        eprintln!("configuration saved to {}", path.display());
        return Ok(());
    }

    let mut builder = CredsFlowBuilder::new().config(config_file).chooser(choose);
    if std::env::var_os(OKTA_PASSWORD).is_none() {
        builder = builder.password(prompt("Okta password: ")?);
    }
    let flow = builder.build().await?;

    let sink =
        CredentialSink::for_config(flow.config(), CredentialStore::from_env, io::stdout())?;
    if let Delivered::Persisted { path, profile } = flow.run(sink).await? {
        eprintln!("credentials written to {} [{profile}]", path.display());
    }
    Ok(())
}

/// Present `options` on stderr and read the chosen index from stdin.
fn choose(kind: Lookup, options: &[String]) -> io::Result<usize> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "Pick {kind}:")?;
    for (index, option) in options.iter().enumerate() {
        writeln!(stderr, "[{index}] {option}")?;
    }
    drop(stderr);

    loop {
        let line = prompt("Selection: ")?;
        match line.trim().parse::<usize>() {
            Ok(index) if index < options.len() => return Ok(index),
            _ => eprintln!("{line:?} is not one of the options, try again"),
        }
    }
}

fn prompt(message: &str) -> io::Result<String> {
    eprint!("{message}");
    io::stderr().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no input"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
