use std::io::{self, Seek, SeekFrom, Write};

use cqdb::CQDBWriter;

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::model::Model;

pub(crate) const MAGIC: &[u8; 4] = b"lGIS";
pub(crate) const MODEL_TYPE: &[u8; 4] = b"MAXE";
pub(crate) const PARAMS_MAGIC: &[u8; 4] = b"PARM";
pub(crate) const VERSION: u32 = 100;
pub(crate) const HEADER_SIZE: usize = 56;

/// Bytes per (outcome, weight) entry of the parameter chunk
const PARAM_SIZE: u64 = 12;

/// Write a trained model in binary form
///
/// Layout, all integers little-endian and all offsets relative to the start
/// of the model:
///
/// ```text
/// header      magic "lGIS", size, type "MAXE", version, #params, #outcomes,
///             #predicates, off_params, off_outcomes, off_predicates,
///             correction_constant (f64), correction_param (f64)
/// PARM chunk  "PARM", chunk size, #predicates, then per predicate:
///             count, count x (outcome id: u32, weight: f64)
/// CQDB        outcome labels by outcome id
/// CQDB        predicate names by predicate id
/// ```
pub(crate) struct ModelWriter;

impl ModelWriter {
    /// Write `model` at the current position of `w`
    pub fn write<W: Write + Seek>(w: &mut W, model: &Model) -> Result<()> {
        let start = w.stream_position()?;

        // Helper to convert a stream position to a relative u32 offset
        let offset = |pos: u64| -> Result<u32> {
            u32::try_from(pos - start)
                .map_err(|_| Error::invalid_model("model size exceeds u32::MAX"))
        };

        // Header is rewritten once the offsets are known
        w.write_all(&[0; HEADER_SIZE])?;

        let off_params = offset(w.stream_position()?)?;
        Self::write_params(w, model)?;

        let off_outcomes = offset(w.stream_position()?)?;
        Self::write_cqdb(w, model.outcomes())?;

        let off_preds = offset(w.stream_position()?)?;
        Self::write_cqdb(w, model.predicates())?;

        let end = w.stream_position()?;
        let size = offset(end)?;
        w.seek(SeekFrom::Start(start))?;
        Self::write_header(
            w,
            model,
            size,
            off_params,
            off_outcomes,
            off_preds,
        )?;
        w.seek(SeekFrom::Start(end))?;

        Ok(())
    }

    fn write_header<W: Write>(
        w: &mut W,
        model: &Model,
        size: u32,
        off_params: u32,
        off_outcomes: u32,
        off_preds: u32,
    ) -> Result<()> {
        let to_u32 = |n: usize, what: &str| -> Result<u32> {
            u32::try_from(n)
                .map_err(|_| Error::invalid_model(format!("number of {} exceeds u32::MAX", what)))
        };

        w.write_all(MAGIC)?;
        w.write_all(&size.to_le_bytes())?;
        w.write_all(MODEL_TYPE)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&to_u32(model.num_parameters(), "parameters")?.to_le_bytes())?;
        w.write_all(&to_u32(model.num_outcomes(), "outcomes")?.to_le_bytes())?;
        w.write_all(&to_u32(model.num_predicates(), "predicates")?.to_le_bytes())?;
        w.write_all(&off_params.to_le_bytes())?;
        w.write_all(&off_outcomes.to_le_bytes())?;
        w.write_all(&off_preds.to_le_bytes())?;
        w.write_all(&model.correction_constant().to_le_bytes())?;
        w.write_all(&model.correction_param().to_le_bytes())?;
        Ok(())
    }

    /// Write the sparse parameter rows
    fn write_params<W: Write>(w: &mut W, model: &Model) -> Result<()> {
        let contexts = model.contexts();
        let chunk_size: u64 = 12
            + contexts
                .iter()
                .map(|ctx| 4 + PARAM_SIZE * ctx.len() as u64)
                .sum::<u64>();
        let chunk_size = u32::try_from(chunk_size).map_err(|_| {
            Error::invalid_model("parameter chunk size exceeds u32::MAX")
        })?;

        w.write_all(PARAMS_MAGIC)?;
        w.write_all(&chunk_size.to_le_bytes())?;
        w.write_all(&(contexts.len() as u32).to_le_bytes())?;
        for ctx in contexts {
            w.write_all(&(ctx.len() as u32).to_le_bytes())?;
            for (oid, weight) in ctx.iter() {
                w.write_all(&oid.to_le_bytes())?;
                w.write_all(&weight.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Write CQDB dictionary
    fn write_cqdb<W: Write + Seek>(w: &mut W, dict: &Dictionary) -> io::Result<()> {
        let mut writer = CQDBWriter::new(&mut *w)?;

        for (s, id) in dict.iter() {
            writer.put(s, id)?;
        }

        // CQDBWriter finishes the database when dropped and swallows any
        // error from that final flush.
        Ok(())
    }
}
