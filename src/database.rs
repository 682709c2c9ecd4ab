//! MySQL access through the `mysql` command-line client.

use crate::config::DbCredentials;
use crate::error::{AppError, Result};
use crate::instance::SuccessPredicate;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

const ACCESS_DENIED: &str = "Access denied";
const GLOBAL_GRANT: &str = "grant all privileges on *.* to ";

/// The MySQL server, as seen by one operator account.
pub struct MySql<'a> {
    runner: &'a dyn CommandRunner,
    credentials: &'a DbCredentials,
}

impl<'a> MySql<'a> {
    pub fn new(runner: &'a dyn CommandRunner, credentials: &'a DbCredentials) -> Self {
        Self {
            runner,
            credentials,
        }
    }

    /// `mysql -u <user> -e <sql>`, with the password passed through `MYSQL_PWD`.
    pub fn command(&self, sql: &str) -> CommandSpec {
        CommandSpec::new("mysql")
            .args(["-u", self.credentials.user.as_str()])
            .args(["-N", "-B", "-e", sql])
            .env("MYSQL_PWD", self.credentials.password.as_str())
    }

    pub fn execute(&self, sql: &str) -> Result<CommandOutput> {
        self.runner.run(&self.command(sql))
    }

    /// Confirm the credentials work and carry global privileges.
    ///
    /// The grant check is textual and tolerant of case and quoting, but a
    /// server that phrases grants differently will still be refused.
    pub fn check_access(&self) -> Result<()> {
        let out = self.execute("show grants;")?;
        if out.output.contains(ACCESS_DENIED) || !out.success() {
            return Err(AppError::database_access(&self.credentials.user));
        }

        let user = &self.credentials.user;
        let single = format!("'{}'", user.to_lowercase());
        let backtick = format!("`{}`", user.to_lowercase());
        let granted = out.output.lines().any(|line| {
            let line = line.to_lowercase();
            line.contains(GLOBAL_GRANT) && (line.contains(&single) || line.contains(&backtick))
        });

        if !granted {
            return Err(AppError::insufficient_privileges(user));
        }
        Ok(())
    }

    pub fn database_exists(&self, db_name: &str) -> Result<bool> {
        let out = self.execute(&format!(
            "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = '{}';",
            db_name
        ))?;
        if !out.success() {
            return Err(AppError::database_access(&self.credentials.user));
        }
        Ok(out.output.lines().any(|line| line.trim() == db_name))
    }

    pub fn create_database(&self, db_name: &str) -> Result<CommandOutput> {
        self.execute(&format!(
            "create database {} default character set utf8;",
            db_name
        ))
    }

    /// Drop `db_name`, returning `false` when mysql printed anything.
    pub fn drop_database(&self, db_name: &str) -> Result<bool> {
        let out = self.execute(&format!("drop database {};", db_name))?;
        Ok(SuccessPredicate::Empty.accepts(&out))
    }

    /// Make tag names case-sensitive so capitalised duplicates can coexist.
    pub fn fix_tag_collation(&self, db_name: &str) -> Result<CommandOutput> {
        self.execute(&format!(
            "use {}; alter table tag modify name varchar(255) collate utf8_bin;",
            db_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct Canned {
        reply: CommandOutput,
        seen: RefCell<Vec<CommandSpec>>,
    }

    impl Canned {
        fn new(reply: CommandOutput) -> Self {
            Self {
                reply,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for Canned {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.seen.borrow_mut().push(spec.clone());
            Ok(self.reply.clone())
        }
    }

    fn creds() -> DbCredentials {
        DbCredentials {
            user: "old".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[test]
    fn password_stays_off_the_command_line() {
        let runner = Canned::new(CommandOutput::ok(""));
        let creds = creds();
        let mysql = MySql::new(&runner, &creds);
        mysql.create_database("blaold").unwrap();

        let seen = runner.seen.borrow();
        let spec = &seen[0];
        assert_eq!(spec.program, "mysql");
        assert!(!spec.args.iter().any(|a| a.contains("s3cret")));
        assert!(spec.envs.contains(&("MYSQL_PWD".to_string(), "s3cret".to_string())));
        assert_eq!(
            spec.args.last().unwrap(),
            "create database blaold default character set utf8;"
        );
    }

    #[test]
    fn grants_are_matched_loosely() {
        let creds = creds();
        for grants in [
            "GRANT ALL PRIVILEGES ON *.* TO 'old'@'localhost' WITH GRANT OPTION",
            "GRANT ALL PRIVILEGES ON *.* TO `old`@`localhost` WITH GRANT OPTION",
        ] {
            let runner = Canned::new(CommandOutput::ok(grants));
            assert!(MySql::new(&runner, &creds).check_access().is_ok(), "{grants}");
        }

        let runner = Canned::new(CommandOutput::ok(
            "GRANT USAGE ON *.* TO 'old'@'localhost'\nGRANT ALL PRIVILEGES ON `blaold`.* TO 'old'@'localhost'",
        ));
        let err = MySql::new(&runner, &creds).check_access().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientPrivileges);
    }

    #[test]
    fn access_denied_is_reported() {
        let creds = creds();
        let runner = Canned::new(CommandOutput::failed(
            1,
            "ERROR 1045 (28000): Access denied for user 'old'@'localhost' (using password: YES)",
        ));
        let err = MySql::new(&runner, &creds).check_access().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DatabaseAccess);
    }

    #[test]
    fn database_exists_matches_whole_lines() {
        let creds = creds();
        let runner = Canned::new(CommandOutput::ok("blaold\n"));
        assert!(MySql::new(&runner, &creds).database_exists("blaold").unwrap());

        let runner = Canned::new(CommandOutput::ok("xblaold\n"));
        assert!(!MySql::new(&runner, &creds).database_exists("blaold").unwrap());
    }
}
