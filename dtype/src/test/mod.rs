
#[cfg(test)]
mod unit;
