use burn::tensor::{backend::Backend, Tensor, TensorData};

pub trait TensorFloatExtension {
    /// Matrix multiplication over the leading batch dimension,
    /// split into chunks the backends can dispatch.
    fn matmul_batched(
        self,
        rhs: Self,
    ) -> Self;

    /// Exclusive prefix sum along the last dimension.
    ///
    /// `output[.., i] = sum(input[.., 0..i])`
    fn sum_cumulative_exclusive(self) -> Self;
}

pub trait TensorQuaternionExtension<B: Backend> {
    /// Rotation matrices of normalized quaternions in scalar-last order.
    ///
    /// `[P, 4]` -> `[P, 3, 3]`
    fn quaternions_to_matrices(self) -> Tensor<B, 3>;
}

impl<B: Backend, const D: usize> TensorFloatExtension for Tensor<B, D> {
    fn matmul_batched(
        self,
        rhs: Self,
    ) -> Self {
        const BATCH_SIZE: usize = (1 << 16) - 1;

        let count = self.dims()[0];
        if D < 3 || count <= BATCH_SIZE {
            return self.matmul(rhs);
        }
        debug_assert_eq!(rhs.dims()[0], count, "rhs.dims()[0]");

        Tensor::cat(
            (0..count)
                .step_by(BATCH_SIZE)
                .map(|start| {
                    let end = (start + BATCH_SIZE).min(count);
                    self.to_owned()
                        .slice([start..end])
                        .matmul(rhs.to_owned().slice([start..end]))
                })
                .collect(),
            0,
        )
    }

    fn sum_cumulative_exclusive(self) -> Self {
        let dims = self.dims();
        let size = dims[D - 1];
        let count = dims[..D - 1].iter().product::<usize>();
        if size == 0 || count == 0 {
            return self;
        }

        // [S, S] (Strictly upper triangular)
        let upper = {
            let mut upper = vec![0.0_f32; size * size];
            (0..size).for_each(|row| {
                upper[row * size + row + 1..(row + 1) * size].fill(1.0);
            });
            Tensor::<B, 2>::from_data(
                TensorData::new(upper, [size, size]),
                &self.device(),
            )
        };

        self.reshape([count, size]).matmul(upper).reshape(dims)
    }
}

impl<B: Backend> TensorQuaternionExtension<B> for Tensor<B, 2> {
    fn quaternions_to_matrices(self) -> Tensor<B, 3> {
        let point_count = self.dims()[0];
        let column = |index: usize| {
            self.to_owned().slice([0..point_count, index..index + 1])
        };

        // [P, 1] * 4
        let (x, y, z, w) = (column(0), column(1), column(2), column(3));

        // [P, 1] * 9
        let xx = x.to_owned() * x.to_owned() * 2.0;
        let yy = y.to_owned() * y.to_owned() * 2.0;
        let zz = z.to_owned() * z.to_owned() * 2.0;
        let xy = x.to_owned() * y.to_owned() * 2.0;
        let xz = x.to_owned() * z.to_owned() * 2.0;
        let yz = y.to_owned() * z.to_owned() * 2.0;
        let wx = w.to_owned() * x * 2.0;
        let wy = w.to_owned() * y * 2.0;
        let wz = w * z * 2.0;

        // [P, 3, 3] <- [P, 9]
        Tensor::cat(
            vec![
                -yy.to_owned() - zz.to_owned() + 1.0,
                xy.to_owned() - wz.to_owned(),
                xz.to_owned() + wy.to_owned(),
                xy + wz,
                -xx.to_owned() - zz + 1.0,
                yz.to_owned() - wx.to_owned(),
                xz - wy,
                yz + wx,
                -xx - yy + 1.0,
            ],
            1,
        )
        .reshape([point_count, 3, 3])
    }
}
