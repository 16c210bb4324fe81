//! Controller output bounds.
//!
//! A [`ControllerBoundProvider`] maps a box of states to a box guaranteed to
//! contain every control the controller can produce on it. Providers are
//! stateless so one instance can serve many runs in parallel.

use crate::error::{ReachError, Result};
use crate::interval::IntervalBox;
use crate::traits::Endpoint;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

pub trait ControllerBoundProvider<T: Endpoint = f64>: Send + Sync {
    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Sound enclosure of the controller's outputs over `input`.
    fn bound_output(&self, input: &IntervalBox<T>) -> Result<IntervalBox<T>>;

    /// Concrete control at a single state.
    ///
    /// The default bounds the degenerate box and returns its midpoint, which
    /// is exact for providers that keep point inputs tight.
    fn evaluate(&self, input: &[T]) -> Result<Vec<T>> {
        let bounds = self.bound_output(&IntervalBox::point_slice(input)?)?;
        Ok(bounds.midpoint().iter().copied().collect())
    }
}

/// Same control box for every state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantControl<T: Endpoint = f64> {
    input_dim: usize,
    bounds: IntervalBox<T>,
}

impl<T: Endpoint> ConstantControl<T> {
    pub fn new(input_dim: usize, bounds: IntervalBox<T>) -> Self {
        Self { input_dim, bounds }
    }
}

impl<T: Endpoint> ControllerBoundProvider<T> for ConstantControl<T> {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.bounds.len()
    }

    fn bound_output(&self, input: &IntervalBox<T>) -> Result<IntervalBox<T>> {
        ReachError::check_len("controller input", self.input_dim, input.len())?;
        Ok(self.bounds.clone())
    }
}

/// Provider backed by a closure, typically an external bound-propagation tool.
pub struct FnController<F> {
    input_dim: usize,
    output_dim: usize,
    bound: F,
}

impl<F> FnController<F> {
    pub fn new(input_dim: usize, output_dim: usize, bound: F) -> Self {
        Self {
            input_dim,
            output_dim,
            bound,
        }
    }
}

impl<T, F> ControllerBoundProvider<T> for FnController<F>
where
    T: Endpoint,
    F: Fn(&IntervalBox<T>) -> Result<IntervalBox<T>> + Send + Sync,
{
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn bound_output(&self, input: &IntervalBox<T>) -> Result<IntervalBox<T>> {
        ReachError::check_len("controller input", self.input_dim, input.len())?;
        let output = (self.bound)(input)?;
        ReachError::check_len("controller output", self.output_dim, output.len())?;
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply<T: Endpoint>(self, x: T) -> T {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(T::zero()),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => T::one() / (T::one() + (-x).exp()),
        }
    }

    pub fn apply_interval<T: Endpoint>(self, x: IntervalBox<T>) -> IntervalBox<T> {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.relu(),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => x.sigmoid(),
        }
    }
}

/// `activation(weights * x + bias)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer<T: Endpoint = f64> {
    pub weights: DMatrix<T>,
    pub bias: DVector<T>,
    pub activation: Activation,
}

impl<T: Endpoint> DenseLayer<T> {
    pub fn new(weights: DMatrix<T>, bias: DVector<T>, activation: Activation) -> Result<Self> {
        ReachError::check_len("layer bias", weights.nrows(), bias.len())?;
        Ok(Self {
            weights,
            bias,
            activation,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }
}

/// Fully connected network bounded by interval bound propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardNetwork<T: Endpoint = f64> {
    layers: Vec<DenseLayer<T>>,
}

impl<T: Endpoint> FeedForwardNetwork<T> {
    pub fn new(layers: Vec<DenseLayer<T>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(ReachError::Dimension {
                what: "network layers",
                expected: 1,
                got: 0,
            });
        }
        for pair in layers.windows(2) {
            ReachError::check_len("layer input", pair[0].output_dim(), pair[1].input_dim())?;
        }
        Ok(Self { layers })
    }

    /// Single affine layer `weights * x + bias`, e.g. a linear state feedback.
    pub fn linear(weights: DMatrix<T>, bias: DVector<T>) -> Result<Self> {
        Self::new(vec![DenseLayer::new(weights, bias, Activation::Identity)?])
    }

    pub fn layers(&self) -> &[DenseLayer<T>] {
        &self.layers
    }

    pub fn forward(&self, input: &[T]) -> Result<Vec<T>> {
        ReachError::check_len("network input", self.input_dim(), input.len())?;
        let mut x = input.to_vec();
        for layer in &self.layers {
            let w = &layer.weights;
            x = (0..w.nrows())
                .map(|i| {
                    let z = (0..w.ncols()).fold(layer.bias[i], |acc, j| acc + w[(i, j)] * x[j]);
                    layer.activation.apply(z)
                })
                .collect();
        }
        Ok(x)
    }
}

impl<T: Endpoint> ControllerBoundProvider<T> for FeedForwardNetwork<T> {
    fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::input_dim)
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::output_dim)
    }

    fn bound_output(&self, input: &IntervalBox<T>) -> Result<IntervalBox<T>> {
        ReachError::check_len("network input", self.input_dim(), input.len())?;
        let mut bounds = input.clone();
        for (k, layer) in self.layers.iter().enumerate() {
            bounds = layer
                .activation
                .apply_interval(bounds.affine(&layer.weights, &layer.bias)?);
            trace!(layer = k, max_width = %bounds.max_width(), "propagated layer bounds");
        }
        Ok(bounds)
    }

    fn evaluate(&self, input: &[T]) -> Result<Vec<T>> {
        self.forward(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_network() -> FeedForwardNetwork {
        let hidden = DenseLayer::new(
            DMatrix::from_row_slice(2, 2, &[1.0, -1.0, 0.5, 2.0]),
            DVector::from_vec(vec![0.0, -0.25]),
            Activation::Relu,
        )
        .unwrap();
        let output = DenseLayer::new(
            DMatrix::from_row_slice(1, 2, &[1.0, -2.0]),
            DVector::from_vec(vec![0.1]),
            Activation::Tanh,
        )
        .unwrap();
        FeedForwardNetwork::new(vec![hidden, output]).unwrap()
    }

    #[test]
    fn single_relu_layer_bounds() {
        let layer = DenseLayer::new(
            DMatrix::from_row_slice(1, 2, &[1.0, -1.0]),
            DVector::from_vec(vec![0.0]),
            Activation::Relu,
        )
        .unwrap();
        let net = FeedForwardNetwork::new(vec![layer]).unwrap();
        let input = IntervalBox::from_slices(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let out = net.bound_output(&input).unwrap();
        assert_eq!(out, IntervalBox::from_slices(&[0.0], &[1.0]).unwrap());
    }

    #[test]
    fn network_bounds_contain_sampled_outputs() {
        let net = small_network();
        let input = IntervalBox::from_slices(&[-1.0, 0.0], &[0.5, 1.0]).unwrap();
        let bounds = net.bound_output(&input).unwrap();
        for i in 0..=10 {
            for j in 0..=10 {
                let x = [-1.0 + 1.5 * i as f64 / 10.0, j as f64 / 10.0];
                let y = net.forward(&x).unwrap();
                assert!(bounds.contains_slice(&y), "{y:?} escapes {bounds}");
            }
        }
    }

    #[test]
    fn point_inputs_evaluate_concretely() {
        let net = small_network();
        let y = net.evaluate(&[0.3, 0.2]).unwrap();
        let point = net
            .bound_output(&IntervalBox::point_slice(&[0.3, 0.2]).unwrap())
            .unwrap();
        assert!(point.contains_slice(&y));
        assert!(point.max_width() < 1e-12);
    }

    #[test]
    fn layer_dimensions_are_checked() {
        let a = DenseLayer::<f64>::new(DMatrix::zeros(3, 2), DVector::zeros(3), Activation::Relu)
            .unwrap();
        let b =
            DenseLayer::<f64>::new(DMatrix::zeros(1, 2), DVector::zeros(1), Activation::Identity)
                .unwrap();
        assert!(matches!(
            FeedForwardNetwork::new(vec![a, b]),
            Err(ReachError::Dimension { .. })
        ));
        assert!(
            DenseLayer::<f64>::new(DMatrix::zeros(2, 2), DVector::zeros(3), Activation::Relu)
                .is_err()
        );
        assert!(FeedForwardNetwork::<f64>::new(Vec::new()).is_err());

        let net = small_network();
        assert!(net.forward(&[1.0]).is_err());
        assert!(net.bound_output(&IntervalBox::point_slice(&[1.0]).unwrap()).is_err());
    }

    #[test]
    fn constant_and_closure_providers() {
        let u = IntervalBox::from_slices(&[-1.0], &[1.0]).unwrap();
        let constant = ConstantControl::new(2, u.clone());
        let x = IntervalBox::from_slices(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert_eq!(constant.bound_output(&x).unwrap(), u);
        assert_eq!(constant.evaluate(&[0.5, 0.5]).unwrap(), vec![0.0]);

        let negate = FnController::new(2, 2, |x: &IntervalBox<f64>| -> Result<IntervalBox<f64>> {
            Ok(x.neg())
        });
        let out = negate.bound_output(&x).unwrap();
        assert_eq!(out, IntervalBox::from_slices(&[-1.0, -1.0], &[0.0, 0.0]).unwrap());

        let wrong = FnController::new(2, 1, |x: &IntervalBox<f64>| -> Result<IntervalBox<f64>> {
            Ok(x.clone())
        });
        assert!(wrong.bound_output(&x).is_err());
    }
}
