use ndarray::{Array, Dimension, Zip};

/// Adam 옵티마이저
///
/// 갱신 식:
/// ```text
/// m = beta1 * m + (1 - beta1) * g
/// v = beta2 * v + (1 - beta2) * g^2
/// m_hat = m / (1 - beta1^t)
/// v_hat = v / (1 - beta2^t)
/// p = p - lr * m_hat / (sqrt(v_hat) + epsilon)
/// ```
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// 편향 보정용 타임스텝 (배치마다 1 증가)
    t: u64,
}

/// 파라미터 텐서 하나에 대한 1차/2차 모멘트 상태
#[derive(Debug, Clone)]
pub struct Moments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    pub fn zeros_like(param: &Array<f32, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
        }
    }

    /// 배치마다 한 번 호출해서 타임스텝을 진행시킨다
    /// 같은 스텝 안의 모든 파라미터 update 호출은 같은 편향 보정 계수를 공유한다
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// 파라미터 텐서 하나를 그래디언트와 모멘트 상태로 갱신
    pub fn update<D: Dimension>(
        &self,
        param: &mut Array<f32, D>,
        grad: &Array<f32, D>,
        moments: &mut Moments<D>,
    ) {
        let t = self.t.max(1) as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let lr = self.learning_rate;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        Zip::from(param)
            .and(grad)
            .and(&mut moments.m)
            .and(&mut moments.v)
            .for_each(|p, &g, m, v| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_adam_minimizes_quadratic() {
        // f(x) = x^2, grad = 2x
        let mut adam = Adam::new(0.1);
        let mut x = Array1::from_elem(1, 1.0_f32);
        let mut moments = Moments::zeros_like(&x);

        for _ in 0..200 {
            let grad = x.mapv(|v| 2.0 * v);
            adam.begin_step();
            adam.update(&mut x, &grad, &mut moments);
        }

        assert!(x[0].abs() < 1e-2, "수렴 실패: x = {}", x[0]);
    }

    #[test]
    fn test_first_step_scale() {
        // 첫 스텝의 편향 보정 후 이동 거리는 학습률과 같은 자릿수
        let mut adam = Adam::new(0.01);
        let mut x = Array1::from_elem(1, 0.0_f32);
        let mut moments = Moments::zeros_like(&x);
        let grad = Array1::from_elem(1, 5.0_f32);

        adam.begin_step();
        adam.update(&mut x, &grad, &mut moments);

        assert!((x[0] + 0.01).abs() < 1e-4, "첫 스텝 크기 이상: {}", x[0]);
    }
}
