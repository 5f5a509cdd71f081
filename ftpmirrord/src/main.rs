use ftpmirrord::daemon::{DaemonConfig, DaemonRuntime};
use ftpmirrord::storage::Credentials;

/// First-run bootstrap flags. Either all of server/user/password are given
/// (the credentials are encrypted and persisted before the loop starts) or
/// none are (stored credentials are loaded instead).
fn parse_bootstrap<I>(args: I) -> anyhow::Result<Option<Credentials>>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1).peekable();
    if args.peek().is_none() {
        return Ok(None);
    }

    let mut server = None;
    let mut user = None;
    let mut password = None;
    while let Some(arg) = args.next() {
        let slot = match arg.as_str() {
            "--server" => &mut server,
            "--user" => &mut user,
            "--password" => &mut password,
            "--help" | "-h" => {
                println!("Usage: ftpmirrord [--server ADDRESS --user NAME --password SECRET]");
                println!("  Without flags, previously stored credentials are used.");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        };
        let value = args
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing value for {arg}"))?;
        *slot = Some(value);
    }

    match (server, user, password) {
        (Some(address), Some(username), Some(password)) => Ok(Some(Credentials {
            address,
            username,
            password,
        })),
        _ => anyhow::bail!("--server, --user and --password must be given together"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let bootstrap = parse_bootstrap(std::env::args())?;
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config, bootstrap).await?;
    daemon.run().await
}
