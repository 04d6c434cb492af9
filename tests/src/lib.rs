//! End-to-end scenarios for satellites provisioned through `planet`.

#[cfg(test)]
mod e2e_planet;
