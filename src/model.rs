use std::{
    collections::HashMap,
    fmt,
    fs::{self, File},
    io::{self, BufWriter, Seek, Write},
    path::Path,
    sync::Arc,
};

use bitflags::bitflags;
use bstr::ByteSlice;
use cqdb::CQDB;

use crate::context::{argmax, Context, EvalParams};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::event::validate_values;
use crate::model_writer::{ModelWriter, HEADER_SIZE, MAGIC, MODEL_TYPE, PARAMS_MAGIC, VERSION};
use crate::prior::{Prior, UniformPrior};

bitflags! {
    /// Sections printed by [`Model::dump`]
    pub struct DumpSections: u32 {
        const HEADER = 0x01;
        const OUTCOMES = 0x02;
        const PREDICATES = 0x04;
        const PARAMETERS = 0x08;
        const ALL = 0x0F;
    }
}

#[inline]
pub(crate) fn unpack_u32(buf: &[u8]) -> io::Result<u32> {
    if buf.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking u32",
        ));
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

#[inline]
fn unpack_f64(buf: &[u8]) -> io::Result<f64> {
    if buf.len() < 8 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking f64",
        ));
    }
    Ok(f64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ]))
}

fn slice_from(buf: &[u8], offset: usize) -> Result<&[u8]> {
    buf.get(offset..)
        .ok_or_else(|| Error::invalid_model(format!("offset {:#X} out of bounds", offset)))
}

/// A trained maximum entropy model
///
/// Holds the predicate table, the outcome labels, one sparse [`Context`]
/// per predicate and the correction constants. A model is immutable; its
/// only job is to evaluate contexts.
#[derive(Clone)]
pub struct Model {
    predicates: Dictionary,
    outcomes: Dictionary,
    contexts: Vec<Context>,
    correction_constant: f64,
    correction_param: f64,
    prior: Arc<dyn Prior>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("num_predicates", &self.num_predicates())
            .field("num_outcomes", &self.num_outcomes())
            .field("num_parameters", &self.num_parameters())
            .field("correction_constant", &self.correction_constant)
            .field("correction_param", &self.correction_param)
            .field("prior", &self.prior)
            .finish()
    }
}

impl Model {
    /// Assemble a model from its parts
    ///
    /// `contexts` is indexed by predicate ID and every outcome ID it
    /// references must exist in `outcomes`.
    pub fn new(
        predicates: Dictionary,
        outcomes: Dictionary,
        contexts: Vec<Context>,
        correction_constant: f64,
        correction_param: f64,
    ) -> Result<Self> {
        if contexts.len() != predicates.len() {
            return Err(Error::invalid_model(format!(
                "{} predicates but {} contexts",
                predicates.len(),
                contexts.len()
            )));
        }
        if outcomes.is_empty() {
            return Err(Error::invalid_model("model has no outcomes"));
        }
        let num_outcomes = outcomes.len() as u32;
        if contexts
            .iter()
            .any(|ctx| ctx.outcomes().iter().any(|&oid| oid >= num_outcomes))
        {
            return Err(Error::invalid_model("context references an unknown outcome"));
        }
        if !(correction_constant > 0.0) || !correction_param.is_finite() {
            return Err(Error::invalid_model("invalid correction constants"));
        }
        Ok(Self {
            predicates,
            outcomes,
            contexts,
            correction_constant,
            correction_param,
            prior: Arc::new(UniformPrior),
        })
    }

    /// Evaluate with `prior` instead of the uniform prior
    ///
    /// This must be the prior the model was trained with.
    pub fn with_prior(mut self, prior: Arc<dyn Prior>) -> Self {
        self.prior = prior;
        self
    }

    /// Load a model from its binary representation
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::invalid_model("invalid model format"));
        }
        if &buf[0..4] != MAGIC {
            return Err(Error::invalid_model("invalid file format, magic mismatch"));
        }
        if &buf[8..12] != MODEL_TYPE {
            return Err(Error::invalid_model("unsupported model type"));
        }
        let size = unpack_u32(&buf[4..])? as usize;
        if size < HEADER_SIZE || size > buf.len() {
            return Err(Error::invalid_model(format!(
                "model size {} does not match {} available bytes",
                size,
                buf.len()
            )));
        }
        let buf = &buf[..size];
        let version = unpack_u32(&buf[12..])?;
        if version != VERSION {
            return Err(Error::invalid_model(format!(
                "unsupported model version {}",
                version
            )));
        }
        let num_params = unpack_u32(&buf[16..])? as usize;
        let num_outcomes = unpack_u32(&buf[20..])?;
        let num_preds = unpack_u32(&buf[24..])?;
        let off_params = unpack_u32(&buf[28..])? as usize;
        let off_outcomes = unpack_u32(&buf[32..])? as usize;
        let off_preds = unpack_u32(&buf[36..])? as usize;
        let correction_constant = unpack_f64(&buf[40..])?;
        let correction_param = unpack_f64(&buf[48..])?;

        if !(HEADER_SIZE <= off_params
            && off_params < off_outcomes
            && off_outcomes < off_preds
            && off_preds < buf.len())
        {
            return Err(Error::invalid_model("inconsistent section offsets"));
        }
        let outcomes = read_dictionary(&buf[..off_preds], off_outcomes, num_outcomes)?;
        let predicates = read_dictionary(buf, off_preds, num_preds)?;
        let contexts = read_contexts(&buf[..off_outcomes], off_params, num_preds)?;
        let found: usize = contexts.iter().map(Context::len).sum();
        if found != num_params {
            return Err(Error::invalid_model(format!(
                "header announces {} parameters, found {}",
                num_params, found
            )));
        }

        Self::new(
            predicates,
            outcomes,
            contexts,
            correction_constant,
            correction_param,
        )
    }

    /// Load a model from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buf = fs::read(path)?;
        Self::from_bytes(&buf)
    }

    /// Write the model in binary form
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        ModelWriter::write(writer, self)
    }

    /// Save the model to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        self.write_to(&mut file)?;
        file.flush()?;
        Ok(())
    }

    /// Number of outcomes
    pub fn num_outcomes(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of predicates
    pub fn num_predicates(&self) -> usize {
        self.predicates.len()
    }

    /// Number of (predicate, outcome) parameters
    pub fn num_parameters(&self) -> usize {
        self.contexts.iter().map(Context::len).sum()
    }

    /// Convert an outcome ID to its label
    pub fn outcome(&self, oid: u32) -> Option<&str> {
        self.outcomes.get_name(oid)
    }

    /// Convert an outcome label to its ID
    pub fn outcome_id(&self, label: &str) -> Option<u32> {
        self.outcomes.get(label)
    }

    /// Convert a predicate ID to its name
    pub fn predicate(&self, pid: u32) -> Option<&str> {
        self.predicates.get_name(pid)
    }

    /// Convert a predicate name to its ID
    pub fn predicate_id(&self, name: &str) -> Option<u32> {
        self.predicates.get(name)
    }

    pub(crate) fn predicates(&self) -> &Dictionary {
        &self.predicates
    }

    pub(crate) fn outcomes(&self) -> &Dictionary {
        &self.outcomes
    }

    /// Weights of a predicate
    pub fn context(&self, pid: u32) -> Option<&Context> {
        self.contexts.get(pid as usize)
    }

    pub(crate) fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Parameter of a (predicate, outcome) pair
    pub fn parameter(&self, predicate: &str, outcome: &str) -> Option<f64> {
        let pid = self.predicate_id(predicate)?;
        let oid = self.outcome_id(outcome)?;
        self.contexts[pid as usize].get(oid)
    }

    pub fn correction_constant(&self) -> f64 {
        self.correction_constant
    }

    pub fn correction_param(&self) -> f64 {
        self.correction_param
    }

    /// Probability of every outcome given `context`, indexed by outcome ID
    ///
    /// Predicates unknown to the model are ignored. `values` gives one value
    /// per predicate of `context`; without it every predicate counts 1.0.
    pub fn eval_probs<S: AsRef<str>>(&self, context: &[S], values: Option<&[f64]>) -> Result<Vec<f64>> {
        if let Some(values) = values {
            validate_values(context, values)?;
        }

        let mut pids = Vec::with_capacity(context.len());
        let mut known_values = values.map(|_| Vec::with_capacity(context.len()));
        for (i, name) in context.iter().enumerate() {
            if let Some(pid) = self.predicates.get(name.as_ref()) {
                pids.push(pid);
                if let (Some(known), Some(values)) = (known_values.as_mut(), values) {
                    known.push(values[i]);
                }
            }
        }

        let mut dist = vec![0.0; self.num_outcomes()];
        self.prior
            .log_prior(&mut dist, &pids, known_values.as_deref());
        self.eval_params()
            .eval(&pids, known_values.as_deref(), &mut dist);
        Ok(dist)
    }

    /// Probability of every outcome given `context`, keyed by outcome label
    pub fn eval<S: AsRef<str>>(&self, context: &[S], values: Option<&[f64]>) -> Result<HashMap<&str, f64>> {
        let probs = self.eval_probs(context, values)?;
        Ok(self
            .outcomes
            .iter()
            .map(|(label, oid)| (label, probs[oid as usize]))
            .collect())
    }

    /// Label of the most probable outcome in `probs`
    pub fn best_outcome(&self, probs: &[f64]) -> Option<&str> {
        argmax(probs).and_then(|oid| self.outcome(oid as u32))
    }

    /// Render `probs` as `label[p] label[p] ...`
    pub fn all_outcomes(&self, probs: &[f64]) -> String {
        probs
            .iter()
            .enumerate()
            .filter_map(|(oid, p)| {
                self.outcome(oid as u32)
                    .map(|label| format!("{}[{:.4}]", label, p))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn eval_params(&self) -> EvalParams<'_> {
        EvalParams {
            contexts: &self.contexts,
            correction_constant: self.correction_constant,
            correction_param: self.correction_param,
        }
    }

    /// Print the model in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W, sections: DumpSections) -> io::Result<()> {
        if sections.contains(DumpSections::HEADER) {
            writeln!(w, "HEADER = {{")?;
            writeln!(w, "  num_outcomes: {}", self.num_outcomes())?;
            writeln!(w, "  num_predicates: {}", self.num_predicates())?;
            writeln!(w, "  num_parameters: {}", self.num_parameters())?;
            writeln!(w, "  correction_constant: {}", self.correction_constant)?;
            writeln!(w, "  correction_param: {}", self.correction_param)?;
            writeln!(w, "}}\n")?;
        }
        if sections.contains(DumpSections::OUTCOMES) {
            writeln!(w, "OUTCOMES = {{")?;
            for (label, oid) in self.outcomes.iter() {
                writeln!(w, "  {:>5}: {}", oid, label)?;
            }
            writeln!(w, "}}\n")?;
        }
        if sections.contains(DumpSections::PREDICATES) {
            writeln!(w, "PREDICATES = {{")?;
            for (name, pid) in self.predicates.iter() {
                writeln!(w, "  {:>5}: {}", pid, name)?;
            }
            writeln!(w, "}}\n")?;
        }
        if sections.contains(DumpSections::PARAMETERS) {
            writeln!(w, "PARAMETERS = {{")?;
            for (name, pid) in self.predicates.iter() {
                for (oid, weight) in self.contexts[pid as usize].iter() {
                    let label = self.outcome(oid).unwrap_or_default();
                    writeln!(w, "  {} --> {}: {:.6}", name, label, weight)?;
                }
            }
            writeln!(w, "}}\n")?;
        }
        Ok(())
    }
}

fn read_dictionary(buf: &[u8], offset: usize, len: u32) -> Result<Dictionary> {
    let db = CQDB::new(slice_from(buf, offset)?)?;
    let mut dict = Dictionary::new();
    for id in 0..len {
        let name = db
            .to_str(id)
            .and_then(|s| s.to_str().ok())
            .ok_or_else(|| Error::invalid_model(format!("no string for id {}", id)))?;
        dict.insert_unique(name)?;
    }
    Ok(dict)
}

fn read_contexts(buf: &[u8], offset: usize, num_preds: u32) -> Result<Vec<Context>> {
    let chunk = slice_from(buf, offset)?;
    if chunk.len() < 12 || &chunk[0..4] != PARAMS_MAGIC {
        return Err(Error::invalid_model("missing parameter chunk"));
    }
    if unpack_u32(&chunk[8..])? != num_preds {
        return Err(Error::invalid_model("parameter chunk does not match header"));
    }
    let mut index = 12;
    let mut contexts = Vec::with_capacity((num_preds as usize).min(chunk.len() / 4));
    for _ in 0..num_preds {
        let n = unpack_u32(slice_from(chunk, index)?)? as usize;
        index += 4;
        let capacity = n.min(chunk.len() / 12);
        let mut outcomes = Vec::with_capacity(capacity);
        let mut parameters = Vec::with_capacity(capacity);
        for _ in 0..n {
            let row = slice_from(chunk, index)?;
            outcomes.push(unpack_u32(row)?);
            parameters.push(unpack_f64(row.get(4..).unwrap_or_default())?);
            index += 12;
        }
        contexts.push(Context::new(outcomes, parameters)?);
    }
    Ok(contexts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        let predicates = Dictionary::from_names(["home", "away"]).unwrap();
        let outcomes = Dictionary::from_names(["win", "lose", "tie"]).unwrap();
        let contexts = vec![
            Context::new(vec![0, 2], vec![1.2, 0.3]).unwrap(),
            Context::new(vec![1], vec![0.8]).unwrap(),
        ];
        Model::new(predicates, outcomes, contexts, 1.0, 0.0).unwrap()
    }

    #[test]
    fn test_model_new_validates() {
        let predicates = Dictionary::from_names(["home"]).unwrap();
        let outcomes = Dictionary::from_names(["win"]).unwrap();
        let bad = vec![Context::new(vec![3], vec![1.0]).unwrap()];
        assert!(Model::new(predicates.clone(), outcomes.clone(), bad, 1.0, 0.0).is_err());
        assert!(Model::new(predicates.clone(), outcomes.clone(), vec![], 1.0, 0.0).is_err());
        let ok = vec![Context::default()];
        assert!(Model::new(predicates, outcomes, ok, 0.0, 0.0).is_err());

        let _debug = format!("{:?}", model());
    }

    #[test]
    fn test_eval_distribution() {
        let model = model();
        let dist = model.eval(&["home"], None).unwrap();
        assert_eq!(dist.len(), 3);
        let total: f64 = dist.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(dist["win"] > dist["tie"]);
        assert!(dist["tie"] > dist["lose"]);

        let z = 1.2f64.exp() + 1.0 + 0.3f64.exp();
        assert!((dist["win"] - 1.2f64.exp() / z).abs() < 1e-12);
    }

    #[test]
    fn test_eval_ignores_unknown_predicates() {
        let model = model();
        let known = model.eval_probs(&["away"], None).unwrap();
        let mixed = model
            .eval_probs(&["unseen", "away"], Some(&[3.0, 1.0]))
            .unwrap();
        assert_eq!(known, mixed);

        let empty = model.eval_probs::<&str>(&[], None).unwrap();
        for p in empty {
            assert!((p - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_eval_values_scale_parameters() {
        let model = model();
        let probs = model.eval_probs(&["away"], Some(&[2.0])).unwrap();
        let z = 2.0 + 1.6f64.exp();
        assert!((probs[1] - 1.6f64.exp() / z).abs() < 1e-12);

        let err = model.eval_probs(&["away"], Some(&[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(_)));
    }

    #[test]
    fn test_best_and_all_outcomes() {
        let model = model();
        let probs = model.eval_probs(&["home"], None).unwrap();
        assert_eq!(model.best_outcome(&probs), Some("win"));
        assert_eq!(model.best_outcome(&[]), None);

        let rendered = model.all_outcomes(&[0.5, 0.25, 0.25]);
        assert_eq!(rendered, "win[0.5000] lose[0.2500] tie[0.2500]");
    }

    #[test]
    fn test_parameter_lookup() {
        let model = model();
        assert_eq!(model.parameter("home", "tie"), Some(0.3));
        assert_eq!(model.parameter("home", "lose"), None);
        assert_eq!(model.parameter("nowhere", "win"), None);
        assert_eq!(model.num_parameters(), 3);
    }

    #[test]
    fn test_model_dump() {
        let model = model();
        let mut out = Vec::new();
        model.dump(&mut out, DumpSections::ALL).unwrap();
        let out_str = std::str::from_utf8(&out).unwrap();
        let expected = r#"HEADER = {
  num_outcomes: 3
  num_predicates: 2
  num_parameters: 3
  correction_constant: 1
  correction_param: 0
}

OUTCOMES = {
      0: win
      1: lose
      2: tie
}

PREDICATES = {
      0: home
      1: away
}

PARAMETERS = {
  home --> win: 1.200000
  home --> tie: 0.300000
  away --> lose: 0.800000
}

"#;
        assert_eq!(out_str, expected);

        let mut out = Vec::new();
        model.dump(&mut out, DumpSections::OUTCOMES).unwrap();
        assert!(std::str::from_utf8(&out).unwrap().starts_with("OUTCOMES"));
    }

    #[test]
    fn test_invalid_model() {
        assert!(Model::from_bytes(b"").is_err());

        let mut buf = Vec::new();
        model().write_to(&mut io::Cursor::new(&mut buf)).unwrap();
        buf[0] = b'L';
        let err = Model::from_bytes(&buf).unwrap_err();
        assert!(err.to_string().contains("magic mismatch"));
    }
}
