//! Path Resolver / Pipeline Builder
//!
//! `a/b/c` becomes `a.main(pipe=b.main(pipe=c.main(pipe=<empty>)))`. Stages
//! are built innermost first, but nothing is pulled here: a generator entry
//! point runs only when the dispatcher drains it.

use indexmap::IndexMap;
use tracing::debug;

use super::Engine;
use crate::error::PipelineError;
use crate::script::{CallArgs, Sequence, Value, Vm};

/// Build the pipeline for a path with its leading slash removed
///
/// Every segment is resolved before any entry point is called, so a missing
/// tail fails the request even when the head would ignore its pipe.
pub fn build_pipeline(
    engine: &Engine,
    vm: &mut Vm<'_>,
    path: &str,
    keywords: &IndexMap<String, Value>,
) -> Result<Value, PipelineError> {
    debug!(%path, "build_pipeline: called");
    let mut names: Vec<&str> = path.split('/').collect();
    if names.len() > 1 && names.last().is_some_and(|name| name.is_empty()) {
        names.pop();
    }

    let mut mains = Vec::with_capacity(names.len());
    for name in &names {
        let main = engine
            .module(name)
            .and_then(|module| module.main())
            .ok_or_else(|| PipelineError::TemplateNotFound(name.to_string()))?;
        mains.push(main);
    }

    let mut pipe = Value::Seq(Sequence::empty());
    for main in mains.iter().rev() {
        let mut args = CallArgs::new(Vec::new());
        args.keywords = keywords.clone();
        args.keywords.insert("pipe".to_string(), pipe);
        pipe = vm.call(main, args)?;
    }
    Ok(pipe)
}
