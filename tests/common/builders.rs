//! Test data builders for creating test graphs

use lazyslot::{operators::OpArrayPiper, Graph, OperatorHandle, Result};
use ndarray::ArrayD;

/// Builder for a pass-through operator whose input already holds an array
pub struct SourceBuilder {
    data: ArrayD<f64>,
}

impl SourceBuilder {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            data: super::ramp(shape),
        }
    }

    pub fn data(mut self, data: ArrayD<f64>) -> Self {
        self.data = data;
        self
    }

    pub fn build(self, graph: &Graph) -> Result<OperatorHandle> {
        let op = graph.instantiate(OpArrayPiper::new())?;
        op.input("Input")?.set_value(self.data)?;
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_builder() {
        let graph = Graph::new();
        let source = SourceBuilder::new(&[3, 4]).build(&graph).unwrap();
        let output = source.output("Output").unwrap();

        assert!(output.ready());
        assert_eq!(output.meta().unwrap().shape, Some(vec![3, 4]));
    }
}
