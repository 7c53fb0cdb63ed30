//! Record arguments and output formatting.

use anyhow::{Context, Result};
use clap::Subcommand;
use gophkeeper_core::{
    BankCardPayload, BinaryPayload, CachedRecord, PasswordPayload, Record, RecordValue,
    TextPayload,
};
use rpassword::prompt_password;
use std::path::PathBuf;

/// A record's name, metainfo and typed value.
#[derive(Subcommand, Debug)]
pub enum RecordArgs {
    /// Website or service login
    Password {
        name: String,
        #[arg(long)]
        login: String,
        /// Secret (will prompt if not provided)
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = "")]
        meta: String,
    },

    /// Free-form note
    Text {
        name: String,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "")]
        meta: String,
    },

    /// Contents of a file
    Binary {
        name: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(long, default_value = "")]
        meta: String,
    },

    /// Bank card
    Card {
        name: String,
        #[arg(long)]
        number: String,
        #[arg(long)]
        month: String,
        #[arg(long)]
        year: String,
        /// Security code (will prompt if not provided)
        #[arg(long)]
        cvv: Option<String>,
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        meta: String,
    },
}

impl RecordArgs {
    pub fn name(&self) -> &str {
        match self {
            Self::Password { name, .. }
            | Self::Text { name, .. }
            | Self::Binary { name, .. }
            | Self::Card { name, .. } => name,
        }
    }

    /// Build the record value, prompting for secrets left off the command
    /// line. Returns `(name, metainfo, value)`.
    pub fn into_parts(self) -> Result<(String, String, RecordValue)> {
        let parts = match self {
            Self::Password {
                name,
                login,
                password,
                meta,
            } => {
                let password = match password {
                    Some(p) => p,
                    None => prompt_password("Password to store: ")?,
                };
                (name, meta, RecordValue::Password(PasswordPayload { login, password }))
            }
            Self::Text { name, text, meta } => {
                (name, meta, RecordValue::Text(TextPayload { text }))
            }
            Self::Binary {
                name,
                file,
                mime,
                meta,
            } => {
                let binary = std::fs::read(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                (name, meta, RecordValue::Binary(BinaryPayload { mime, binary }))
            }
            Self::Card {
                name,
                number,
                month,
                year,
                cvv,
                owner,
                meta,
            } => {
                let cvv = match cvv {
                    Some(c) => c,
                    None => prompt_password("Card security code: ")?,
                };
                let card = BankCardPayload {
                    number,
                    month,
                    year,
                    cvv,
                    owner,
                };
                (name, meta, RecordValue::BankCard(card))
            }
        };
        Ok(parts)
    }
}

/// One line per record for `list`.
pub fn summary_line(record: &CachedRecord) -> String {
    let kind = record
        .versions
        .first()
        .map(|v| v.kind.to_string())
        .unwrap_or_else(|| "?".to_string());
    let mut line = format!("{:<24} {:<8} {}", record.name, kind, record.status);
    if record.versions.len() > 1 {
        line.push_str(&format!(" ({} versions)", record.versions.len()));
    }
    line
}

/// Full text of one version for `show`.
pub fn describe(record: &Record) -> Result<String> {
    let mut out = format!(
        "name:     {}\nkind:     {}\nstatus:   {}\ncreated:  {}\nedited:   {}\n",
        record.name, record.kind, record.status, record.create_time, record.edit_time
    );
    if !record.metainfo.is_empty() {
        out.push_str(&format!("meta:     {}\n", record.metainfo));
    }
    match record.value()? {
        RecordValue::Password(p) => {
            out.push_str(&format!("login:    {}\npassword: {}\n", p.login, p.password));
        }
        RecordValue::Text(t) => out.push_str(&format!("text:\n{}\n", t.text)),
        RecordValue::Binary(b) => {
            out.push_str(&format!("type:     {}\nsize:     {} bytes\n", b.mime, b.binary.len()));
        }
        RecordValue::BankCard(c) => out.push_str(&format!(
            "number:   {}\nexpires:  {}/{}\ncvv:      {}\nowner:    {}\n",
            c.number, c.month, c.year, c.cvv, c.owner
        )),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gophkeeper_core::RecordStatus;

    #[test]
    fn text_args_build_a_record_value() {
        let args = RecordArgs::Text {
            name: "todo".to_string(),
            text: "buy milk".to_string(),
            meta: "home".to_string(),
        };
        assert_eq!(args.name(), "todo");
        let (name, meta, value) = args.into_parts().unwrap();
        assert_eq!((name.as_str(), meta.as_str()), ("todo", "home"));
        assert_eq!(
            value,
            RecordValue::Text(TextPayload {
                text: "buy milk".to_string()
            })
        );
    }

    #[test]
    fn binary_args_read_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("key.bin");
        std::fs::write(&file, [0u8, 1, 2]).unwrap();

        let (_, _, value) = RecordArgs::Binary {
            name: "key".to_string(),
            file,
            mime: "application/x-key".to_string(),
            meta: String::new(),
        }
        .into_parts()
        .unwrap();
        let RecordValue::Binary(b) = value else {
            panic!("expected a binary value");
        };
        assert_eq!(b.binary, vec![0, 1, 2]);
    }

    #[test]
    fn describe_and_summarize() {
        let record = Record::new(
            "visa",
            "",
            &RecordValue::BankCard(BankCardPayload {
                number: "4111111111111111".to_string(),
                month: "04".to_string(),
                year: "2030".to_string(),
                cvv: "123".to_string(),
                owner: "ALICE".to_string(),
            }),
        )
        .unwrap();
        let text = describe(&record).unwrap();
        assert!(text.contains("expires:  04/2030"));

        let cached = CachedRecord {
            name: "visa".to_string(),
            status: RecordStatus::Conflict,
            versions: vec![record.clone(), record],
        };
        let line = summary_line(&cached);
        assert!(line.contains("card"));
        assert!(line.contains("CONFLICT (2 versions)"));
    }
}
