use std::path::Path;

use ndarray::{s, Array1, Array2, Array3, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::optimizer::{Adam, Moments};
use crate::utility::errors::{ForecastError, ForecastResult};

/// 가중치 초기화/미니배치 셔플에 쓰는 고정 시드 (재현성)
const SEED: u64 = 0;
/// 학습 미니배치 크기
const TRAIN_BATCH_SIZE: usize = 8;
/// Adam 학습률
const LEARNING_RATE: f32 = 0.01;

/// model_config.json으로 영속화되는 모델 구조 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LstmConfig {
    pub input_size: usize,
    pub hidden_size: usize,
}

impl LstmConfig {
    pub fn save(&self, path: &Path) -> ForecastResult<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> ForecastResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LstmConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// 단층 LSTM + 선형 출력층
///
/// 입력은 정규화된 윈도우 배치 [N, T, C], 출력은 다음 스텝의 **원시** 가격 벡터
/// [N, C]. 타깃이 원시 스케일이므로 손실도 원시 스케일에서 계산된다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmModel {
    pub config: LstmConfig,

    // 입력 게이트
    w_ii: Array2<f32>,
    w_hi: Array2<f32>,
    b_i: Array1<f32>,
    // 망각 게이트
    w_if: Array2<f32>,
    w_hf: Array2<f32>,
    b_f: Array1<f32>,
    // 셀 후보
    w_ig: Array2<f32>,
    w_hg: Array2<f32>,
    b_g: Array1<f32>,
    // 출력 게이트
    w_io: Array2<f32>,
    w_ho: Array2<f32>,
    b_o: Array1<f32>,
    // 선형 출력층
    w_fc: Array2<f32>,
    b_fc: Array1<f32>,
}

/// 역전파에 필요한 타임스텝별 활성값
struct StepCache {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    c_prev: Array2<f32>,
    i: Array2<f32>,
    f: Array2<f32>,
    g: Array2<f32>,
    o: Array2<f32>,
    tc: Array2<f32>,
}

/// 파라미터와 같은 모양의 그래디언트 묶음
struct LstmGrads {
    w_ii: Array2<f32>,
    w_hi: Array2<f32>,
    b_i: Array1<f32>,
    w_if: Array2<f32>,
    w_hf: Array2<f32>,
    b_f: Array1<f32>,
    w_ig: Array2<f32>,
    w_hg: Array2<f32>,
    b_g: Array1<f32>,
    w_io: Array2<f32>,
    w_ho: Array2<f32>,
    b_o: Array1<f32>,
    w_fc: Array2<f32>,
    b_fc: Array1<f32>,
}

impl LstmGrads {
    fn zeros_like(model: &LstmModel) -> Self {
        Self {
            w_ii: Array2::zeros(model.w_ii.raw_dim()),
            w_hi: Array2::zeros(model.w_hi.raw_dim()),
            b_i: Array1::zeros(model.b_i.raw_dim()),
            w_if: Array2::zeros(model.w_if.raw_dim()),
            w_hf: Array2::zeros(model.w_hf.raw_dim()),
            b_f: Array1::zeros(model.b_f.raw_dim()),
            w_ig: Array2::zeros(model.w_ig.raw_dim()),
            w_hg: Array2::zeros(model.w_hg.raw_dim()),
            b_g: Array1::zeros(model.b_g.raw_dim()),
            w_io: Array2::zeros(model.w_io.raw_dim()),
            w_ho: Array2::zeros(model.w_ho.raw_dim()),
            b_o: Array1::zeros(model.b_o.raw_dim()),
            w_fc: Array2::zeros(model.w_fc.raw_dim()),
            b_fc: Array1::zeros(model.b_fc.raw_dim()),
        }
    }
}

/// 모든 파라미터에 대응하는 Adam 모멘트 상태
struct LstmMoments {
    w_ii: Moments<ndarray::Ix2>,
    w_hi: Moments<ndarray::Ix2>,
    b_i: Moments<ndarray::Ix1>,
    w_if: Moments<ndarray::Ix2>,
    w_hf: Moments<ndarray::Ix2>,
    b_f: Moments<ndarray::Ix1>,
    w_ig: Moments<ndarray::Ix2>,
    w_hg: Moments<ndarray::Ix2>,
    b_g: Moments<ndarray::Ix1>,
    w_io: Moments<ndarray::Ix2>,
    w_ho: Moments<ndarray::Ix2>,
    b_o: Moments<ndarray::Ix1>,
    w_fc: Moments<ndarray::Ix2>,
    b_fc: Moments<ndarray::Ix1>,
}

impl LstmMoments {
    fn zeros_like(model: &LstmModel) -> Self {
        Self {
            w_ii: Moments::zeros_like(&model.w_ii),
            w_hi: Moments::zeros_like(&model.w_hi),
            b_i: Moments::zeros_like(&model.b_i),
            w_if: Moments::zeros_like(&model.w_if),
            w_hf: Moments::zeros_like(&model.w_hf),
            b_f: Moments::zeros_like(&model.b_f),
            w_ig: Moments::zeros_like(&model.w_ig),
            w_hg: Moments::zeros_like(&model.w_hg),
            b_g: Moments::zeros_like(&model.b_g),
            w_io: Moments::zeros_like(&model.w_io),
            w_ho: Moments::zeros_like(&model.w_ho),
            b_o: Moments::zeros_like(&model.b_o),
            w_fc: Moments::zeros_like(&model.w_fc),
            b_fc: Moments::zeros_like(&model.b_fc),
        }
    }
}

impl LstmModel {
    /// 고정 시드로 결정론적 초기화 (U(-1/sqrt(H), 1/sqrt(H)))
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(SEED);
        let limit = (1.0 / hidden_size as f32).sqrt();
        let dist = Uniform::new(-limit, limit);

        let mat = |rows: usize, cols: usize, rng: &mut StdRng| {
            Array2::random_using((rows, cols), dist, rng)
        };
        let vec = |len: usize, rng: &mut StdRng| Array1::random_using(len, dist, rng);

        let (h, c) = (hidden_size, input_size);
        Self {
            config: LstmConfig {
                input_size,
                hidden_size,
            },
            w_ii: mat(h, c, &mut rng),
            w_hi: mat(h, h, &mut rng),
            b_i: vec(h, &mut rng),
            w_if: mat(h, c, &mut rng),
            w_hf: mat(h, h, &mut rng),
            b_f: vec(h, &mut rng),
            w_ig: mat(h, c, &mut rng),
            w_hg: mat(h, h, &mut rng),
            b_g: vec(h, &mut rng),
            w_io: mat(h, c, &mut rng),
            w_ho: mat(h, h, &mut rng),
            b_o: vec(h, &mut rng),
            w_fc: mat(c, h, &mut rng),
            b_fc: vec(c, &mut rng),
        }
    }

    pub fn from_config(config: LstmConfig) -> Self {
        Self::new(config.input_size, config.hidden_size)
    }

    /// 순수 순전파 (평가 모드, 그래디언트 추적 없음)
    /// 윈도우 한 개짜리 배치든 여러 개든 [N, T, C] → [N, C]
    pub fn predict(&self, x: &Array3<f32>) -> Array2<f32> {
        let (y, _) = self.forward(x, false);
        y
    }

    /// 윈도우 하나 [T, C]에 대한 예측 벡터 [C] (롤아웃용)
    pub fn predict_one(&self, window: &Array2<f32>) -> Array1<f32> {
        let batch = window
            .clone()
            .insert_axis(Axis(0));
        self.predict(&batch).row(0).to_owned()
    }

    /// 순전파. want_cache가 참이면 역전파용 활성값을 함께 반환
    fn forward(&self, x: &Array3<f32>, want_cache: bool) -> (Array2<f32>, Vec<StepCache>) {
        let (batch, seq_len, _) = x.dim();
        let h_size = self.config.hidden_size;

        let mut h = Array2::<f32>::zeros((batch, h_size));
        let mut c = Array2::<f32>::zeros((batch, h_size));
        let mut caches = Vec::with_capacity(if want_cache { seq_len } else { 0 });

        for t in 0..seq_len {
            let x_t = x.slice(s![.., t, ..]).to_owned();

            let i = sigmoid(&(x_t.dot(&self.w_ii.t()) + h.dot(&self.w_hi.t()) + &self.b_i));
            let f = sigmoid(&(x_t.dot(&self.w_if.t()) + h.dot(&self.w_hf.t()) + &self.b_f));
            let g = tanh(&(x_t.dot(&self.w_ig.t()) + h.dot(&self.w_hg.t()) + &self.b_g));
            let o = sigmoid(&(x_t.dot(&self.w_io.t()) + h.dot(&self.w_ho.t()) + &self.b_o));

            let c_next = &f * &c + &i * &g;
            let tc = tanh(&c_next);
            let h_next = &o * &tc;

            if want_cache {
                caches.push(StepCache {
                    x: x_t,
                    h_prev: h.clone(),
                    c_prev: c.clone(),
                    i,
                    f,
                    g,
                    o,
                    tc,
                });
            }

            h = h_next;
            c = c_next;
        }

        let y = h.dot(&self.w_fc.t()) + &self.b_fc;
        (y, caches)
    }

    /// L1 손실의 역전파 (BPTT). 모든 파라미터의 그래디언트를 계산한다
    fn backward(
        &self,
        caches: &[StepCache],
        y_hat: &Array2<f32>,
        y: &Array2<f32>,
    ) -> LstmGrads {
        let (batch, out) = y_hat.dim();
        let scale = 1.0 / (batch * out) as f32;

        // d(mean |y_hat - y|)/d(y_hat) = sign(y_hat - y) / (B * C)
        let dy = (y_hat - y).mapv(|v| v.signum() * scale);

        let mut grads = LstmGrads::zeros_like(self);

        let last = match caches.last() {
            Some(last) => last,
            None => return grads,
        };

        // 출력층
        let h_last = &last.o * &last.tc;
        grads.w_fc = dy.t().dot(&h_last);
        grads.b_fc = dy.sum_axis(Axis(0));

        let mut dh = dy.dot(&self.w_fc);
        let mut dc = Array2::<f32>::zeros(dh.raw_dim());

        for cache in caches.iter().rev() {
            let do_ = &dh * &cache.tc;
            dc = dc + &dh * &cache.o * cache.tc.mapv(|v| 1.0 - v * v);

            let di = &dc * &cache.g;
            let df = &dc * &cache.c_prev;
            let dg = &dc * &cache.i;

            // 게이트 사전 활성값 기준 그래디언트
            let da_i = &di * &cache.i * cache.i.mapv(|v| 1.0 - v);
            let da_f = &df * &cache.f * cache.f.mapv(|v| 1.0 - v);
            let da_g = &dg * cache.g.mapv(|v| 1.0 - v * v);
            let da_o = &do_ * &cache.o * cache.o.mapv(|v| 1.0 - v);

            grads.w_ii += &da_i.t().dot(&cache.x);
            grads.w_hi += &da_i.t().dot(&cache.h_prev);
            grads.b_i += &da_i.sum_axis(Axis(0));

            grads.w_if += &da_f.t().dot(&cache.x);
            grads.w_hf += &da_f.t().dot(&cache.h_prev);
            grads.b_f += &da_f.sum_axis(Axis(0));

            grads.w_ig += &da_g.t().dot(&cache.x);
            grads.w_hg += &da_g.t().dot(&cache.h_prev);
            grads.b_g += &da_g.sum_axis(Axis(0));

            grads.w_io += &da_o.t().dot(&cache.x);
            grads.w_ho += &da_o.t().dot(&cache.h_prev);
            grads.b_o += &da_o.sum_axis(Axis(0));

            dh = da_i.dot(&self.w_hi)
                + da_f.dot(&self.w_hf)
                + da_g.dot(&self.w_hg)
                + da_o.dot(&self.w_ho);
            dc = &dc * &cache.f;
        }

        grads
    }

    /// 전체 학습 루프
    ///
    /// 셔플된 미니배치로 epochs회 전체 패스를 돌며, 손실은 원시 타깃에 대한
    /// 평균 절대 오차, 옵티마이저는 배치마다 모든 파라미터를 갱신하는 Adam.
    /// 조기 종료나 검증 분할은 없다. 에폭 평균 손실 이력을 반환한다.
    pub fn train_fn(
        &mut self,
        x: &Array3<f32>,
        y: &Array2<f32>,
        epochs: usize,
    ) -> ForecastResult<Vec<f32>> {
        let n_samples = x.dim().0;
        if n_samples == 0 {
            return Err(ForecastError::general(
                "학습 샘플이 없습니다 (윈도우 0개)".to_string(),
            ));
        }
        if y.dim().0 != n_samples {
            return Err(ForecastError::general(format!(
                "학습 샘플/타깃 개수 불일치: {} vs {}",
                n_samples,
                y.dim().0
            )));
        }

        let mut rng = StdRng::seed_from_u64(SEED);
        let mut adam = Adam::new(LEARNING_RATE);
        let mut moments = LstmMoments::zeros_like(self);
        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut loss_history = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            indices.shuffle(&mut rng);

            let mut epoch_loss = 0.0_f32;
            let mut n_batches = 0usize;

            for chunk in indices.chunks(TRAIN_BATCH_SIZE) {
                let x_batch = x.select(Axis(0), chunk);
                let y_batch = y.select(Axis(0), chunk);

                let (y_hat, caches) = self.forward(&x_batch, true);
                let loss = (&y_hat - &y_batch).mapv(f32::abs).mean().unwrap_or(0.0);
                epoch_loss += loss;
                n_batches += 1;

                let grads = self.backward(&caches, &y_hat, &y_batch);
                adam.begin_step();
                self.apply_grads(&adam, &grads, &mut moments);
            }

            let avg_loss = epoch_loss / n_batches as f32;
            loss_history.push(avg_loss);

            if epoch % 100 == 0 {
                info!("Epoch {} loss: {}", epoch, avg_loss);
            } else {
                debug!("Epoch {} loss: {}", epoch, avg_loss);
            }
        }

        Ok(loss_history)
    }

    fn apply_grads(&mut self, adam: &Adam, grads: &LstmGrads, moments: &mut LstmMoments) {
        adam.update(&mut self.w_ii, &grads.w_ii, &mut moments.w_ii);
        adam.update(&mut self.w_hi, &grads.w_hi, &mut moments.w_hi);
        adam.update(&mut self.b_i, &grads.b_i, &mut moments.b_i);
        adam.update(&mut self.w_if, &grads.w_if, &mut moments.w_if);
        adam.update(&mut self.w_hf, &grads.w_hf, &mut moments.w_hf);
        adam.update(&mut self.b_f, &grads.b_f, &mut moments.b_f);
        adam.update(&mut self.w_ig, &grads.w_ig, &mut moments.w_ig);
        adam.update(&mut self.w_hg, &grads.w_hg, &mut moments.w_hg);
        adam.update(&mut self.b_g, &grads.b_g, &mut moments.b_g);
        adam.update(&mut self.w_io, &grads.w_io, &mut moments.w_io);
        adam.update(&mut self.w_ho, &grads.w_ho, &mut moments.w_ho);
        adam.update(&mut self.b_o, &grads.b_o, &mut moments.b_o);
        adam.update(&mut self.w_fc, &grads.w_fc, &mut moments.w_fc);
        adam.update(&mut self.b_fc, &grads.b_fc, &mut moments.b_fc);
    }

    /// 가중치 blob(model.bin)과 model_config.json을 저장
    pub fn save(&self, weights_path: &Path, config_path: &Path) -> ForecastResult<()> {
        let encoded = bincode::serialize(self)
            .map_err(|e| ForecastError::model_loading(format!("가중치 직렬화 실패: {}", e)))?;
        std::fs::write(weights_path, encoded)?;
        self.config.save(config_path)?;
        Ok(())
    }

    /// 아티팩트 로드. 저장된 input_size가 현재 티커 수와 다르면 실패한다
    pub fn load(
        weights_path: &Path,
        config_path: &Path,
        expected_input_size: usize,
    ) -> ForecastResult<Self> {
        let config = LstmConfig::load(config_path)?;
        if config.input_size != expected_input_size {
            return Err(ForecastError::ArtifactMismatch {
                expected: expected_input_size,
                actual: config.input_size,
            });
        }

        let blob = std::fs::read(weights_path)?;
        let model: LstmModel = bincode::deserialize(&blob)
            .map_err(|e| ForecastError::model_loading(format!("가중치 역직렬화 실패: {}", e)))?;

        if model.config != config {
            return Err(ForecastError::model_loading(format!(
                "model.bin과 model_config.json의 구조가 다릅니다: {:?} vs {:?}",
                model.config, config
            )));
        }

        Ok(model)
    }
}

fn sigmoid(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

fn tanh(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(f32::tanh)
}
