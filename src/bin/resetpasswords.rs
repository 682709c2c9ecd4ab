//! `resetpasswords`: give every user of an OLD a new password and mail it to them.

use std::process::ExitCode;

use clap::Parser;

use old_provisioner::reset::{reset_all, Mailer, Notice, OldClient};
use old_provisioner::{
    init_logging, report_failure, Console, Palette, Prompter as _, Result, StdinPrompter,
    SystemRunner,
};

#[derive(Debug, Parser)]
#[command(
    name = "resetpasswords",
    version,
    about = "Reset the passwords of all users of an OLD and email them the new ones"
)]
struct Cli {
    /// Base URL of the OLD, e.g. https://www.myoldurl.com/blaold
    url: String,

    /// Administrator whose password is left alone
    #[arg(long)]
    admin_username: String,

    /// Administrator password
    #[arg(long, env = "OLD_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Language the OLD documents, used in the notice
    #[arg(long)]
    language: String,

    /// Sender address of the notices
    #[arg(long)]
    from: String,

    #[arg(long, default_value = "Your OLD password has been changed")]
    subject: String,

    /// Where users log in
    #[arg(long, default_value = "http://app.dative.ca")]
    dative_url: String,

    /// Closing line of the notice
    #[arg(long, default_value = "The OLD administrator")]
    signature: String,

    /// sendmail-compatible program; the message is passed on stdin with -t
    #[arg(long, default_value = "sendmail")]
    sendmail: String,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

async fn run(cli: Cli, console: Console, palette: Palette) -> Result<()> {
    let admin_password = match cli.admin_password.filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => StdinPrompter::new(palette).require(
            &format!("Please enter the password of {}:", cli.admin_username),
            "You must provide the administrator's password.",
        )?,
    };

    let api = OldClient::new(&cli.url)?;
    let runner = SystemRunner;
    let mailer = Mailer {
        runner: &runner,
        sendmail: cli.sendmail,
        from: cli.from,
        subject: cli.subject,
    };
    let notice = Notice {
        language: cli.language,
        dative_url: cli.dative_url,
        signature: cli.signature,
    };

    console.header(&format!("Resetting passwords on {}.", api.base_url()));
    let report = reset_all(
        &api,
        &cli.admin_username,
        &admin_password,
        &notice,
        &mailer,
        console,
    )
    .await?;

    if report.failed.is_empty() && report.not_notified.is_empty() {
        console.ok(&report.summary());
    } else {
        console.warn(&report.summary());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let palette = Palette::detect(!cli.no_color);
    let console = Console::new(palette);

    match run(cli, console, palette).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(console, &e),
    }
}
