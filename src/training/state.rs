//! Mutable bookkeeping of a training run

/// Training state for monitoring and gradient accumulation
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Training batches seen across all epochs; the step of every sink record
    pub global_step: usize,
    pub running_loss_tr: f64,
    pub running_loss_val: f64,
    pub running_loss_ts: f64,
    /// Backward passes since the last optimizer step
    pub ave_grad: usize,
    pub current_lr: f64,
    /// Training loss history (per epoch)
    pub train_losses: Vec<f64>,
}

impl TrainingState {
    pub fn new(initial_lr: f64, start_epoch: usize) -> Self {
        Self {
            epoch: start_epoch,
            global_step: 0,
            running_loss_tr: 0.0,
            running_loss_val: 0.0,
            running_loss_ts: 0.0,
            ave_grad: 0,
            current_lr: initial_lr,
            train_losses: Vec::new(),
        }
    }

    /// Count a backward pass; true when the window of `n_ave_grad` is full
    /// and the optimizer should step
    pub fn register_backward(&mut self, n_ave_grad: usize) -> bool {
        self.ave_grad += 1;
        if self.ave_grad % n_ave_grad.max(1) == 0 {
            self.ave_grad = 0;
            true
        } else {
            false
        }
    }

    /// Add a batch loss; at the last batch of the epoch returns the mean and
    /// resets the running sum
    pub fn add_train_loss(&mut self, loss: f64, batch_index: usize, num_batches: usize) -> Option<f64> {
        self.running_loss_tr += loss;
        if !is_last_batch(batch_index, num_batches) {
            return None;
        }
        let mean = self.running_loss_tr / num_batches as f64;
        self.running_loss_tr = 0.0;
        self.train_losses.push(mean);
        Some(mean)
    }
}

/// `ii % n == n - 1`
pub fn is_last_batch(batch_index: usize, num_batches: usize) -> bool {
    num_batches > 0 && batch_index % num_batches == num_batches - 1
}

/// Batches between two training grids; up to 10 grids per epoch
pub fn plot_interval(num_batches: usize) -> usize {
    let per_epoch = num_batches.min(10);
    if per_epoch == 0 {
        return 1;
    }
    (num_batches / per_epoch).max(1)
}

/// True every `period` epochs, on the last epoch of each period
pub fn is_period_end(epoch: usize, period: usize) -> bool {
    period > 0 && epoch % period == period - 1
}
