//! Parámetros de ejecución del runtime.

use std::time::Duration;

use crate::errors::IntentError;

/// Configuración inmutable compartida por executor y orquestador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Máximo de steps ejecutándose a la vez (todas las journeys). El exceso
    /// queda en cola.
    pub max_concurrency: usize,
    /// Duración máxima de una invocación de handler.
    pub handler_timeout: Duration,
    /// Vida de un claim del ledger sin renovar.
    pub lease_ttl: Duration,
    /// Intervalo de sondeo cuando se espera un claim ajeno al proceso.
    pub join_poll_interval: Duration,
    /// Intentos por step cuando la definición no declara `max_attempts`.
    pub default_max_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_concurrency: 8,
               handler_timeout: Duration::from_secs(30),
               lease_ttl: Duration::from_secs(60),
               join_poll_interval: Duration::from_millis(50),
               default_max_attempts: 1 }
    }
}

impl RuntimeConfig {
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_handler_timeout(mut self, d: Duration) -> Self {
        self.handler_timeout = d;
        self
    }

    pub fn with_lease_ttl(mut self, d: Duration) -> Self {
        self.lease_ttl = d;
        self
    }

    pub fn with_join_poll_interval(mut self, d: Duration) -> Self {
        self.join_poll_interval = d;
        self
    }

    pub fn with_default_max_attempts(mut self, n: u32) -> Self {
        self.default_max_attempts = n;
        self
    }

    /// El lease debe sobrevivir a la invocación más larga permitida; de lo
    /// contrario un handler vivo perdería su claim.
    pub fn validate(&self) -> Result<(), IntentError> {
        if self.max_concurrency == 0 {
            return Err(IntentError::Validation("max_concurrency must be > 0".into()));
        }
        if self.default_max_attempts == 0 {
            return Err(IntentError::Validation("default_max_attempts must be > 0".into()));
        }
        if self.lease_ttl <= self.handler_timeout {
            return Err(IntentError::Validation(format!("lease_ttl ({:?}) must exceed handler_timeout ({:?})",
                                                       self.lease_ttl, self.handler_timeout)));
        }
        Ok(())
    }
}
