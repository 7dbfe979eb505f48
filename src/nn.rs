//! A minimal feed-forward model that can be traced into ONNX.

use ndarray::{Array1, Array2, ArrayD, Ix2, IxDyn};
use rand::Rng;
use rand_distr::Uniform;

use crate::converter::{Trace, TraceableModel};
use crate::error::{Error, Result};
use crate::model::{Attribute, Node, Tensor};

#[derive(Debug, Clone)]
pub enum Layer {
    /// `y = x W^T + b` with `W` of shape `(out_features, in_features)`
    Linear { weight: Array2<f32>, bias: Array1<f32> },
    Relu,
    Sigmoid,
    /// Collapses every axis after the first
    Flatten,
    /// Only active in training mode
    Dropout { ratio: f32 },
}

impl Layer {
    pub fn linear(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if bias.len() != weight.nrows() {
            return Err(Error::InvalidShape(format!(
                "bias has {} elements but weight has {} rows",
                bias.len(),
                weight.nrows()
            )));
        }
        Ok(Layer::Linear { weight, bias })
    }

    /// Linear layer with weights drawn from U(-1/sqrt(in), 1/sqrt(in))
    pub fn linear_init<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        Layer::Linear {
            weight: Array2::from_shape_simple_fn((out_features, in_features), || rng.sample(&dist)),
            bias: Array1::from_shape_simple_fn(out_features, || rng.sample(&dist)),
        }
    }

    fn op_type(&self) -> &'static str {
        match self {
            Layer::Linear { .. } => "Gemm",
            Layer::Relu => "Relu",
            Layer::Sigmoid => "Sigmoid",
            Layer::Flatten => "Flatten",
            Layer::Dropout { .. } => "Dropout",
        }
    }

    fn emits_node(&self, training: bool) -> bool {
        !matches!(self, Layer::Dropout { .. }) || training
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Linear { weight, bias } => {
                let x = x.into_dimensionality::<Ix2>().map_err(|_| {
                    Error::InvalidShape("Linear expects a 2-D input, add a Flatten layer".to_string())
                })?;
                if x.ncols() != weight.ncols() {
                    return Err(Error::InvalidShape(format!(
                        "Linear expects {} input features, got {}",
                        weight.ncols(),
                        x.ncols()
                    )));
                }
                Ok((x.dot(&weight.t()) + bias).into_dyn())
            }
            Layer::Relu => Ok(x.mapv(|v| v.max(0.0))),
            Layer::Sigmoid => Ok(x.mapv(|v| 1.0 / (1.0 + (-v).exp()))),
            Layer::Flatten => {
                if x.ndim() < 2 {
                    return Err(Error::InvalidShape("Flatten expects at least 2 axes".to_string()));
                }
                let batch = x.shape()[0];
                let rest = x.len() / batch;
                x.into_shape(IxDyn(&[batch, rest]))
                    .map_err(|e| Error::InvalidShape(e.to_string()))
            }
            Layer::Dropout { .. } => Ok(x),
        }
    }

    fn node(&self, index: usize, input: &str, output: &str) -> (Node, Vec<Tensor>) {
        let name = format!("{}_{}", self.op_type(), index);
        let node = Node::new(index, name, self.op_type()).with_outputs([output]);

        match self {
            Layer::Linear { weight, bias } => {
                let w_name = format!("fc{}.weight", index);
                let b_name = format!("fc{}.bias", index);
                let tensors = vec![
                    Tensor::from_f32(
                        w_name.clone(),
                        vec![weight.nrows() as i64, weight.ncols() as i64],
                        &weight.iter().copied().collect::<Vec<_>>(),
                    ),
                    Tensor::from_f32(b_name.clone(), vec![bias.len() as i64], &bias.to_vec()),
                ];
                let node = node
                    .with_inputs([input.to_string(), w_name, b_name])
                    .with_attribute("transB", Attribute::Int(1));
                (node, tensors)
            }
            Layer::Flatten => (
                node.with_inputs([input]).with_attribute("axis", Attribute::Int(1)),
                Vec::new(),
            ),
            Layer::Dropout { ratio } => {
                let ratio_name = format!("dropout{}.ratio", index);
                let tensors = vec![Tensor::from_f32(ratio_name.clone(), vec![], &[*ratio])];
                (node.with_inputs([input.to_string(), ratio_name]), tensors)
            }
            Layer::Relu | Layer::Sigmoid => (node.with_inputs([input]), Vec::new()),
        }
    }
}

/// Layers applied in order. New models start in training mode.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    training: bool,
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequential {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            training: true,
        }
    }

    pub fn push(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.layers
            .iter()
            .try_fold(input.clone(), |x, layer| layer.forward(x))
    }
}

impl TraceableModel for Sequential {
    fn eval(&mut self) {
        self.training = false;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn trace(&self, input_name: &str, output_name: &str, sample: &ArrayD<f32>) -> Result<Trace> {
        let output = self.forward(sample)?;

        let emitting: Vec<(usize, &Layer)> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.emits_node(self.training))
            .collect();

        let mut nodes = Vec::with_capacity(emitting.len().max(1));
        let mut initializers = Vec::new();
        let mut current = input_name.to_string();

        for (pos, (index, layer)) in emitting.iter().enumerate() {
            let out = if pos + 1 == emitting.len() {
                output_name.to_string()
            } else {
                format!("{}_{}_out", layer.op_type(), index)
            };
            let (node, tensors) = layer.node(*index, &current, &out);
            nodes.push(node);
            initializers.extend(tensors);
            current = out;
        }

        if nodes.is_empty() {
            nodes.push(
                Node::new(0, "Identity_0", "Identity")
                    .with_inputs([input_name])
                    .with_outputs([output_name]),
            );
        }

        Ok(Trace {
            nodes,
            initializers,
            output_shape: output.shape().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn identity_linear() -> Layer {
        Layer::linear(array![[1.0, 0.0], [0.0, 1.0]], array![0.5, -0.5]).unwrap()
    }

    #[test]
    fn test_forward_linear_relu() {
        let model = Sequential::new().push(identity_linear()).push(Layer::Relu);
        let x = array![[1.0f32, 2.0]].into_dyn();

        let y = model.forward(&x).unwrap();
        assert_eq!(y, array![[1.5f32, 1.5]].into_dyn());
    }

    #[test]
    fn test_feature_mismatch_is_reported() {
        let model = Sequential::new().push(identity_linear());
        let x = ArrayD::<f32>::zeros(IxDyn(&[1, 3]));

        let err = model.forward(&x).unwrap_err();
        assert!(err.to_string().contains("expects 2 input features"));
    }

    #[test]
    fn test_flatten_then_linear() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = Sequential::new()
            .push(Layer::Flatten)
            .push(Layer::linear_init(12, 5, &mut rng));
        let x = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 4]));

        assert_eq!(model.forward(&x).unwrap().shape(), &[2, 5]);
    }

    #[test]
    fn test_trace_names_and_dropout_in_eval_mode() {
        let mut model = Sequential::new()
            .push(identity_linear())
            .push(Layer::Dropout { ratio: 0.5 })
            .push(Layer::Relu);
        let x = ArrayD::<f32>::zeros(IxDyn(&[1, 2]));

        let training = model.trace("input", "output", &x).unwrap();
        assert!(training.nodes.iter().any(|n| n.op_type == "Dropout"));

        model.eval();
        let trace = model.trace("input", "output", &x).unwrap();
        let ops: Vec<&str> = trace.nodes.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, vec!["Gemm", "Relu"]);
        assert_eq!(trace.nodes[0].inputs[0], "input");
        assert_eq!(trace.nodes[1].outputs[0], "output");
        assert_eq!(trace.nodes[1].inputs[0], trace.nodes[0].outputs[0]);
        assert_eq!(trace.initializers.len(), 2);
        assert_eq!(trace.output_shape, vec![1, 2]);

        model.train();
        assert!(model.is_training());
        let retraced = model.trace("input", "output", &x).unwrap();
        assert_eq!(retraced.nodes.len(), 3);
        assert_eq!(retraced.initializers.len(), 3);
    }

    #[test]
    fn test_empty_model_traces_to_identity() {
        let trace = Sequential::new()
            .trace("input", "output", &ArrayD::<f32>::zeros(IxDyn(&[1, 4])))
            .unwrap();
        assert_eq!(trace.nodes.len(), 1);
        assert_eq!(trace.nodes[0].op_type, "Identity");
    }
}
