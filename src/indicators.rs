pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period <= 1 || prices.len() < period {
        return prices.to_vec();
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for i in 0..period - 1 {
        // Not enough history yet; fall back to the running mean so the
        // output stays aligned with the input.
        let window = &prices[..=i];
        sma_values.push(window.iter().sum::<f64>() / window.len() as f64);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

/// Wilder-smoothed RSI. The first `period` outputs are a neutral 50
/// until enough history accumulates.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() || period == 0 {
        return vec![50.0; prices.len()];
    }

    let mut rsi_values = vec![50.0; prices.len()];
    if prices.len() <= period {
        return rsi_values;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    rsi_values[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period + 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Rate of change over `period` bars, as a fraction. Zeros until
/// enough history exists.
pub fn calculate_roc(prices: &[f64], period: usize) -> Vec<f64> {
    let mut roc_values = vec![0.0; prices.len()];
    if period == 0 {
        return roc_values;
    }
    for i in period..prices.len() {
        let base = prices[i - period];
        if base != 0.0 {
            roc_values[i] = (prices[i] - base) / base;
        }
    }
    roc_values
}
