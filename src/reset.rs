//! Rotating the passwords of every user of a running OLD.

use std::time::Duration;

use rand::seq::SliceRandom as _;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::console::Console;
use crate::error::{AppError, Result};
use crate::runner::{CommandRunner, CommandSpec};

const LETTERS_AND_DIGITS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
pub const PUNCTUATION: &[u8] = b",!{}[]().;:/";

fn pick<R: Rng + ?Sized>(rng: &mut R, set: &[u8]) -> char {
    set.choose(rng).copied().map_or('x', char::from)
}

/// A password the OLD accepts: four random characters, then one upper-case
/// letter, one lower-case letter, one digit and one punctuation mark.
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut password = String::with_capacity(8);
    for _ in 0..4 {
        let any = if rng.gen_range(0..LETTERS_AND_DIGITS.len() + PUNCTUATION.len())
            < LETTERS_AND_DIGITS.len()
        {
            LETTERS_AND_DIGITS
        } else {
            PUNCTUATION
        };
        password.push(pick(rng, any));
    }
    for set in [UPPER, LOWER, DIGITS, PUNCTUATION] {
        password.push(pick(rng, set));
    }
    password
}

/// The body of `PUT users/<id>` that sets `password` and leaves everything
/// else as the API returned it.
pub fn prepare_user_update(user: &Map<String, Value>, password: &str) -> Map<String, Value> {
    let mut update = user.clone();
    update.insert("password".to_string(), Value::from(password));
    update.insert("password_confirm".to_string(), Value::from(password));

    // GET returns related orthographies as objects, PUT wants their ids.
    for key in ["input_orthography", "output_orthography"] {
        if let Some(id) = update
            .get(key)
            .and_then(|orthography| orthography.get("id"))
            .cloned()
        {
            update.insert(key.to_string(), id);
        }
    }

    if update.get("markup_language").and_then(Value::as_str) == Some("restructuredText") {
        update.insert(
            "markup_language".to_string(),
            Value::from("reStructuredText"),
        );
    }
    update
}

/// The update went through when the OLD echoes the user back.
pub fn update_succeeded(response: &Value, username: &str) -> bool {
    response.get("username").and_then(Value::as_str) == Some(username)
}

/// Session against one OLD's JSON API.
pub struct OldClient {
    client: Client,
    base_url: String,
}

impl OldClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn json(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Value> {
        let resp = request
            .send()
            .await
            .map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        // The OLD reports validation errors as JSON with a 400 status.
        resp.json::<Value>()
            .await
            .map_err(|e| AppError::network_with_url(url, format!("Failed to parse response: {}", e)))
    }

    /// Log in; the session cookie is kept for later requests.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = self.url("login/authenticate");
        let body = self
            .json(
                self.client
                    .post(&url)
                    .json(&json!({ "username": username, "password": password })),
                &url,
            )
            .await?;
        if body.get("authenticated").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(AppError::network_with_url(
                &url,
                format!("Unable to log in as {}", username),
            ))
        }
    }

    pub async fn users(&self) -> Result<Vec<Map<String, Value>>> {
        let url = self.url("users");
        let body = self.json(self.client.get(&url), &url).await?;
        match body {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(user) => Some(user),
                    _ => None,
                })
                .collect()),
            other => Err(AppError::network_with_url(
                &url,
                format!("Expected a list of users, got {}", other),
            )),
        }
    }

    pub async fn update_user(&self, id: u64, user: &Map<String, Value>) -> Result<Value> {
        let url = self.url(&format!("users/{}", id));
        self.json(self.client.put(&url).json(user), &url).await
    }
}

/// Wording of the credentials notice.
#[derive(Debug, Clone)]
pub struct Notice {
    /// Language the OLD documents; also the Dative server name prefix.
    pub language: String,
    pub dative_url: String,
    pub signature: String,
}

impl Notice {
    pub fn body(&self, username: &str, password: &str) -> String {
        let language = &self.language;
        format!(
            "Dear {language} Dative/OLD user,

You are receiving this email because the {language} Dative/OLD system has moved
and your password has been changed.

Your database can now be accessed at {dative}. When you go to log
in, you should find \"{language} OLD\" in your list of servers. Choose that one and
enter the following username and password.

- username: {username}
- password: {password}

Please change your password when you first log in by going to the users page
(Resources > Users) and editing your user.

If you need help, you can reply to this email. You may also find useful
information at the Dative or OLD web sites:

    - http://www.dative.ca
    - http://www.onlinelinguisticdatabase.org

Thank you,

{signature}",
            dative = self.dative_url,
            signature = self.signature,
        )
    }
}

/// Sends mail through a sendmail-compatible command.
pub struct Mailer<'a> {
    pub runner: &'a dyn CommandRunner,
    pub sendmail: String,
    pub from: String,
    pub subject: String,
}

impl Mailer<'_> {
    pub fn message(&self, to: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.from, to, self.subject, body
        )
    }

    pub fn send(&self, to: &str, body: &str) -> Result<()> {
        let spec = CommandSpec::new(self.sendmail.as_str())
            .arg("-t")
            .stdin(self.message(to, body));
        let out = self.runner.run(&spec)?;
        if out.success() {
            Ok(())
        } else {
            Err(AppError::other(format!(
                "{} exited with {:?}: {}",
                self.sendmail,
                out.status,
                out.trimmed()
            )))
        }
    }
}

/// Users touched by a run, by outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub changed: Vec<String>,
    pub failed: Vec<String>,
    /// Changed, but the new password could not be e-mailed.
    pub not_notified: Vec<String>,
}

impl ResetReport {
    pub fn summary(&self) -> String {
        format!(
            "Changed {} password(s); {} failed; {} user(s) could not be notified.",
            self.changed.len(),
            self.failed.len(),
            self.not_notified.len()
        )
    }
}

/// Tell the user about the new password, or show it to the operator when
/// that is not possible.
fn notify(
    user: &Map<String, Value>,
    username: &str,
    password: &str,
    notice: &Notice,
    mailer: &Mailer<'_>,
    console: Console,
    report: &mut ResetReport,
) {
    let email = user
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|email| !email.is_empty());
    let Some(email) = email else {
        console.warn(&format!(
            "Could not send email; {} has no email address. Their new password is {}",
            username, password
        ));
        report.not_notified.push(username.to_string());
        return;
    };

    match mailer.send(email, &notice.body(username, password)) {
        Ok(()) => log::info!("sent credentials of {} to {}", username, email),
        Err(e) => {
            log::warn!("mail to {} failed: {}", email, e);
            console.warn(&format!(
                "Could not email {} at {}. Their new password is {}",
                username, email, password
            ));
            report.not_notified.push(username.to_string());
        }
    }
}

/// Give every user except `admin_username` a new password and mail it to
/// them. A failure for one user does not stop the others.
pub async fn reset_all(
    api: &OldClient,
    admin_username: &str,
    admin_password: &str,
    notice: &Notice,
    mailer: &Mailer<'_>,
    console: Console,
) -> Result<ResetReport> {
    api.login(admin_username, admin_password).await?;
    let users = api.users().await?;
    let mut report = ResetReport::default();

    for user in users {
        let Some(username) = user.get("username").and_then(Value::as_str) else {
            log::warn!("skipping user without a username: {:?}", user.get("id"));
            continue;
        };
        if username == admin_username {
            continue;
        }
        let Some(id) = user.get("id").and_then(Value::as_u64) else {
            console.warn(&format!("Failed to change password of {}: no id.", username));
            report.failed.push(username.to_string());
            continue;
        };

        let password = generate_password(&mut rand::thread_rng());
        let update = prepare_user_update(&user, &password);
        match api.update_user(id, &update).await {
            Ok(response) if update_succeeded(&response, username) => {
                console.ok(&format!("Successfully changed password of {}.", username));
                report.changed.push(username.to_string());
                notify(&user, username, &password, notice, mailer, console, &mut report);
            }
            Ok(response) => {
                log::warn!("update of {} rejected: {}", username, response);
                console.warn(&format!("Failed to change password of {}.", username));
                report.failed.push(username.to_string());
            }
            Err(e) => {
                log::warn!("update of {} failed: {}", username, e);
                console.warn(&format!("Failed to change password of {}.", username));
                report.failed.push(username.to_string());
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rand::rngs::StdRng;
    use rand::SeedableRng as _;

    use super::*;
    use crate::runner::CommandOutput;

    #[test]
    fn passwords_have_every_character_class() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let password = generate_password(&mut rng);
            let chars: Vec<char> = password.chars().collect();
            assert_eq!(chars.len(), 8);
            assert!(chars[4].is_ascii_uppercase());
            assert!(chars[5].is_ascii_lowercase());
            assert!(chars[6].is_ascii_digit());
            assert!(PUNCTUATION.contains(&(chars[7] as u8)));
            assert!(chars[..4]
                .iter()
                .all(|c| c.is_ascii_alphanumeric() || PUNCTUATION.contains(&(*c as u8))));
        }
    }

    #[test]
    fn update_payload_is_normalised() {
        let user = json!({
            "id": 3,
            "username": "ana",
            "input_orthography": {"id": 2, "name": "IPA"},
            "output_orthography": null,
            "markup_language": "restructuredText",
            "email": "ana@example.org"
        });
        let Value::Object(user) = user else {
            unreachable!()
        };

        let update = prepare_user_update(&user, "abcdE f1!");
        assert_eq!(update["password"], "abcdE f1!");
        assert_eq!(update["password_confirm"], "abcdE f1!");
        assert_eq!(update["input_orthography"], 2);
        assert_eq!(update["output_orthography"], Value::Null);
        assert_eq!(update["markup_language"], "reStructuredText");
        assert_eq!(update["email"], "ana@example.org");
    }

    #[test]
    fn success_means_the_user_is_echoed_back() {
        assert!(update_succeeded(&json!({"username": "ana", "id": 3}), "ana"));
        assert!(!update_succeeded(&json!({"errors": {"password": "too short"}}), "ana"));
    }

    struct Sendmail(RefCell<Vec<CommandSpec>>, i32);

    impl CommandRunner for Sendmail {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.0.borrow_mut().push(spec.clone());
            Ok(CommandOutput {
                status: Some(self.1),
                output: String::new(),
            })
        }
    }

    fn notice() -> Notice {
        Notice {
            language: "Blackfoot".to_string(),
            dative_url: "https://app.dative.ca".to_string(),
            signature: "The OLD team".to_string(),
        }
    }

    #[test]
    fn mail_is_piped_to_sendmail() {
        let runner = Sendmail(RefCell::new(Vec::new()), 0);
        let mailer = Mailer {
            runner: &runner,
            sendmail: "/usr/sbin/sendmail".to_string(),
            from: "admin@example.org".to_string(),
            subject: "Your new OLD password".to_string(),
        };
        mailer
            .send("ana@example.org", &notice().body("ana", "Ab1!xY2;"))
            .unwrap();

        let calls = runner.0.borrow();
        assert_eq!(calls[0].program, "/usr/sbin/sendmail");
        assert_eq!(calls[0].args, ["-t".to_string()]);
        let message = calls[0].stdin.as_deref().unwrap();
        assert!(message.starts_with("From: admin@example.org\nTo: ana@example.org\n"));
        assert!(message.contains("- password: Ab1!xY2;"));
        assert!(message.contains("\"Blackfoot OLD\""));
        assert!(message.trim_end().ends_with("The OLD team"));
    }

    #[test]
    fn users_without_email_are_reported() {
        let runner = Sendmail(RefCell::new(Vec::new()), 75);
        let mailer = Mailer {
            runner: &runner,
            sendmail: "sendmail".to_string(),
            from: "admin@example.org".to_string(),
            subject: "s".to_string(),
        };
        let console = Console::new(crate::console::Palette::plain());
        let mut report = ResetReport::default();

        let Value::Object(no_email) = json!({"username": "bo", "email": ""}) else {
            unreachable!()
        };
        notify(&no_email, "bo", "pw", &notice(), &mailer, console, &mut report);
        assert!(runner.0.borrow().is_empty());

        let Value::Object(bouncing) = json!({"username": "cy", "email": "cy@example.org"}) else {
            unreachable!()
        };
        notify(&bouncing, "cy", "pw", &notice(), &mailer, console, &mut report);
        assert_eq!(report.not_notified, ["bo".to_string(), "cy".to_string()]);
        assert!(report.summary().ends_with("2 user(s) could not be notified."));
    }
}
