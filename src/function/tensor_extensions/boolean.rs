use burn::tensor::{backend::Backend, Bool, ElementConversion, Int, Tensor};

pub trait TensorBoolExtension {
    fn logical_and(
        self,
        rhs: Self,
    ) -> Self;

    fn logical_or(
        self,
        rhs: Self,
    ) -> Self;

    /// The count of `true` elements.
    fn count_true(self) -> usize;

    /// Indices of `true` elements along the only dimension.
    fn indices(self) -> Tensor<Self::Backend, 1, Int>;

    type Backend: Backend;
}

impl<B: Backend> TensorBoolExtension for Tensor<B, 1, Bool> {
    type Backend = B;

    #[inline]
    fn logical_and(
        self,
        rhs: Self,
    ) -> Self {
        self.int().mul(rhs.int()).greater_elem(0)
    }

    #[inline]
    fn logical_or(
        self,
        rhs: Self,
    ) -> Self {
        self.int().add(rhs.int()).greater_elem(0)
    }

    #[inline]
    fn count_true(self) -> usize {
        if self.dims()[0] == 0 {
            return 0;
        }
        self.int().sum().into_scalar().elem::<i64>() as usize
    }

    #[inline]
    fn indices(self) -> Tensor<B, 1, Int> {
        self.argwhere().squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn logical_ops() {
        use super::*;
        use burn::{backend::NdArray, tensor::TensorData};

        let device = Default::default();
        let lhs = Tensor::<NdArray<f32>, 1, Bool>::from_data(
            TensorData::from([true, true, false, false]),
            &device,
        );
        let rhs = Tensor::<NdArray<f32>, 1, Bool>::from_data(
            TensorData::from([true, false, true, false]),
            &device,
        );

        let output = lhs.to_owned().logical_and(rhs.to_owned()).into_data();
        assert_eq!(output.to_vec::<bool>().unwrap(), [true, false, false, false]);

        let output = lhs.to_owned().logical_or(rhs.to_owned());
        assert_eq!(
            output.to_owned().into_data().to_vec::<bool>().unwrap(),
            [true, true, true, false]
        );
        assert_eq!(output.to_owned().count_true(), 3);

        let output = output.indices().into_data().convert::<i64>();
        assert_eq!(output.to_vec::<i64>().unwrap(), [0, 1, 2]);
    }
}
