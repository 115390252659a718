use std::{fs, io::Write};

use anyhow::{Context, Result};
use futures::StreamExt;
use gentable_core::gen_table::{
    GenTableClient, GenTableStreamEvent, RowAddRequest, RowRegenRequest, TableImportRequest,
};
use tracing::info;

use crate::args::Command;

/// Runs one streaming command, writing events to `out` as they arrive.
pub async fn run<C, W>(client: &C, cmd: Command, out: &mut W) -> Result<()>
where
    C: GenTableClient,
    W: Write,
{
    let mut stream = match cmd {
        Command::AddRow {
            table_type,
            table_id,
            rows,
        } => {
            client
                .add_row_stream(table_type, RowAddRequest::new(table_id, rows))
                .await?
        }
        Command::RegenRow {
            table_type,
            table_id,
            row_ids,
        } => {
            client
                .regen_row_stream(table_type, RowRegenRequest::new(table_id, row_ids))
                .await?
        }
        Command::Import {
            table_type,
            table_id,
            file,
            delimiter,
        } => {
            let data = fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "data.csv".to_string());
            let mut req = TableImportRequest::new(table_id, file_name, data);
            req.delimiter = delimiter;
            client.import_table_data_stream(table_type, req).await?
        }
        Command::Version | Command::Help => return Ok(()),
    };

    let mut printer = EventPrinter::default();
    let mut count = 0usize;
    while let Some(item) = stream.next().await {
        let ev = item?;
        printer.print(&ev, out)?;
        count += 1;
    }
    printer.finish(out)?;
    info!(target:"gentable::cli","stream finished events={}", count);
    Ok(())
}

/// Prints completion text inline, starting a new block whenever the
/// row or output column changes.
#[derive(Default)]
pub struct EventPrinter {
    current: Option<(String, String)>,
}

impl EventPrinter {
    pub fn print<W: Write>(&mut self, ev: &GenTableStreamEvent, out: &mut W) -> Result<()> {
        let key = (
            ev.row_id().unwrap_or("-").to_string(),
            ev.output_column_name().to_string(),
        );
        match ev {
            GenTableStreamEvent::Chunk(c) => {
                if self.current.as_ref() != Some(&key) {
                    self.finish(out)?;
                    write!(out, "[{} {}] ", key.0, key.1)?;
                    self.current = Some(key);
                }
                write!(out, "{}", c.text())?;
            }
            GenTableStreamEvent::References(r) => {
                self.finish(out)?;
                writeln!(
                    out,
                    "[{} {}] references: {} chunk(s) for {:?}",
                    key.0,
                    key.1,
                    r.chunks.len(),
                    r.search_query
                )?;
            }
        }
        out.flush()?;
        Ok(())
    }

    pub fn finish<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if self.current.take().is_some() {
            writeln!(out)?;
        }
        Ok(())
    }
}
