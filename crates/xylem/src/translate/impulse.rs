use super::{TransformTranslator, TranslateError};
use crate::context::TranslationContext;
use crate::pipeline::{Pipeline, TransformNode};
use crate::source::ImpulseSource;
use std::sync::Arc;

/// Translates impulse transforms: one empty byte string in the global
/// window, read through the same source path as bounded reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpulseTranslator;

impl TransformTranslator for ImpulseTranslator {
    fn translate(
        &self,
        node: &TransformNode,
        pipeline: &Pipeline,
        context: &mut TranslationContext,
    ) -> Result<(), TranslateError> {
        let output = super::single_output(node)?;
        super::translate_source(node, output, pipeline, context, Arc::new(ImpulseSource))
    }
}
