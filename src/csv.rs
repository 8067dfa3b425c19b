use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::engine::Wallet;
use crate::model::{Command, UserId};

/// Errors that can occur when reading commands or writing wallets
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{command}'")]
    UnrecognizedType { line: usize, command: String },

    #[error("line {line}: {command} missing {field}")]
    MissingField {
        line: usize,
        command: String,
        field: &'static str,
    },

    #[error("failed to write csv output: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: Option<UserId>,
    id: Option<u64>,
    target: Option<u64>,
    amount: Option<f64>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    balance: String,
    frozen: String,
    pending: String,
    available: String,
    status: String,
}

impl InputRow {
    fn require<T>(
        &self,
        value: Option<T>,
        line: usize,
        field: &'static str,
    ) -> Result<T, CsvError> {
        value.ok_or_else(|| CsvError::MissingField {
            line,
            command: self.r#type.clone(),
            field,
        })
    }

    fn user(&self, line: usize) -> Result<UserId, CsvError> {
        self.require(self.user, line, "user")
    }

    fn id(&self, line: usize) -> Result<u64, CsvError> {
        self.require(self.id, line, "id")
    }

    fn target(&self, line: usize) -> Result<u64, CsvError> {
        self.require(self.target, line, "target")
    }

    fn amount(&self, line: usize) -> Result<Amount, CsvError> {
        self.require(self.amount, line, "amount")
            .map(Amount::from_float)
    }

    fn into_command(self, line: usize) -> Result<Command, CsvError> {
        let command = match self.r#type.as_str() {
            "register" => Command::Register {
                user: self.user(line)?,
            },
            "fee" => Command::PayFee {
                user: self.user(line)?,
                amount: self.amount(line)?,
            },
            "deposit" => Command::Deposit {
                user: self.user(line)?,
                amount: self.amount(line)?,
            },
            "withdraw" => Command::Withdraw {
                user: self.user(line)?,
                amount: self.amount(line)?,
            },
            "project" => Command::AddProject {
                name: format!("project {}", self.id.unwrap_or_default()),
            },
            "plot" => Command::AddPlot {
                project: self.target(line)?,
                price: self.amount(line)?,
            },
            "invest" => Command::Invest {
                user: self.user(line)?,
                project: self.target(line)?,
                amount: self.amount(line)?,
            },
            "approve" => Command::Approve {
                investment: self.id(line)?,
            },
            "cancel" => Command::Cancel {
                investment: self.id(line)?,
            },
            "sale" => Command::Sale {
                investment: self.id(line)?,
                sale_price: self.amount(line)?,
            },
            "distribute" => Command::Distribute {
                profit: self.id(line)?,
            },
            "reinvest" => Command::Reinvest {
                profit: self.id(line)?,
                project: self.target(line)?,
                amount: self.amount(line)?,
            },
            "auto_reinvest" => Command::AutoReinvest {
                profit: self.id(line)?,
                project: self.target,
            },
            other => {
                return Err(CsvError::UnrecognizedType {
                    line,
                    command: other.to_string(),
                });
            }
        };
        Ok(command)
    }
}

/// Read commands from a csv file with the columns `type,user,id,target,amount`
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_command(line)
        }))
}

/// Write wallet snapshots to stdout in csv format
pub fn write_wallets<'a>(wallets: impl IntoIterator<Item = &'a Wallet>) -> Result<(), CsvError> {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for wallet in wallets {
        let row = OutputRow {
            user: wallet.user(),
            balance: wallet.balance().to_string(),
            frozen: wallet.frozen_amount().to_string(),
            pending: wallet.pending_amount().to_string(),
            available: wallet.available().to_string(),
            status: wallet.status().to_string(),
        };
        writer.serialize(&row)?;
    }

    writer.flush().map_err(|e| CsvError::Write(e.into()))?;
    Ok(())
}
