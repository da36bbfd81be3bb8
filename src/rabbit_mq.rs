//! This module provides abstractions on top of [`lapin`]'s [`Channel`] and [`Connection`].
//!
//! [`lapin`]: https://docs.rs/crate/lapin
//! [`Channel`]: https://docs.rs/lapin/latest/lapin/struct.Channel.html
//! [`Connection`]: https://docs.rs/lapin/latest/lapin/struct.Connection.html

use crate::configuration::RabbitMqSettings;
use crate::transport::{BrokerChannel, BrokerConnection, TransportError};
use anyhow::Context;
use lapin::{
    options::BasicQosOptions,
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
/// All the information required to connect to a RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: std::time::Duration,
    /// TLS configuration for the connection to RabbitMq.
    /// If `None`, the connection will not be encrypted.
    tls: Option<Arc<Tls>>,
}

#[derive(Clone)]
struct Tls {
    connector: NativeTlsConnector,
    domain_name: String,
}

/// A connection to a RabbitMq broker.
///
/// Connections should be re-used across multiple channels given the initial setup cost.
pub struct Connection(lapin::Connection);

/// A RabbitMq channel multiplexed over a [`Connection`].
pub struct Channel(lapin::Channel);

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// It allows you to customize the TLS configuration.
    ///
    /// A connection timeout can be (optionally) specified in `settings`.
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    pub fn new_from_config(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let tls = settings
            .tls
            .as_ref()
            .map::<Result<Tls, anyhow::Error>, _>(|tls_settings| {
                let server_domain_name = tls_settings
                    .domain
                    .clone()
                    .unwrap_or_else(|| settings.amqp_uri().authority.host);

                let mut connector_builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    connector_builder.add_root_certificate(certificate);
                }

                let connector = connector_builder.build().expect("TLS configuration failed");
                Ok(Tls {
                    domain_name: server_domain_name,
                    connector,
                })
            })
            .transpose()?;
        let connection_timeout = settings
            .connection_timeout()
            .unwrap_or_else(|| std::time::Duration::from_secs(10));
        Ok(Self {
            uri: settings.amqp_uri(),
            connection_timeout,
            tls: tls.map(Arc::new),
        })
    }

    /// Replaces the TLS Connector for the connection factory
    pub fn set_tls_connector(&mut self, connector: NativeTlsConnector) {
        self.set_tls_connector_with_domain(connector, self.uri.authority.host.clone());
    }

    /// Replaces the TLS Connector for the connection factory, along with the expected domain name for the certificate
    pub fn set_tls_connector_with_domain(
        &mut self,
        connector: NativeTlsConnector,
        domain_name: String,
    ) {
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name,
        }));
    }

    /// Create a new connection to a RabbitMq broker.
    ///
    /// It establishes an encrypted connection if `self.tls` is `Some`.
    /// It establishes an unencrypted connection if `self.tls` is `None`.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self))]
    pub async fn new_connection(&self) -> Result<Connection, anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = match &self.tls {
            None => self.connect_without_tls(properties).await,
            Some(tls) => self.connect_with_tls(properties, Arc::clone(tls)).await,
        }?;
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(Connection(connection))
    }

    /// Establish a new unencrypted connection to a RabbitMq broker.
    async fn connect_without_tls(
        &self,
        properties: ConnectionProperties,
    ) -> Result<lapin::Connection, anyhow::Error> {
        match tokio::time::timeout(
            self.connection_timeout,
            lapin::Connection::connect_uri(self.uri.clone(), properties),
        )
        .await
        {
            Ok(result) => result.with_context(|| "Failed to connect to RabbitMQ."),
            Err(_) => Err(anyhow::anyhow!(
                "Timed out while trying to connect to RabbitMQ."
            )),
        }
    }

    /// Establish a new TLS connection to a RabbitMq broker.
    async fn connect_with_tls(
        &self,
        properties: ConnectionProperties,
        tls_configuration: Arc<Tls>,
    ) -> Result<lapin::Connection, anyhow::Error> {
        match tokio::time::timeout(
            self.connection_timeout,
            lapin::Connection::connector(
                self.uri.clone(),
                Box::new(move |uri| {
                    // First establish a plain TCP connection using the AMQP protocol
                    let mut amqp_uri = uri.clone();
                    amqp_uri.scheme = AMQPScheme::AMQP;
                    amqp_uri
                        .connect()
                        // Then perform a TLS handshake with custom settings
                        // including customisation of the expected domain for the server certificate
                        .and_then(|tcp| {
                            tcp.into_native_tls(
                                &tls_configuration.connector,
                                &tls_configuration.domain_name,
                            )
                        })
                }),
                properties,
            ),
        )
        .await
        {
            Ok(result) => {
                result.with_context(|| "Failed to establish a TLS connection to RabbitMQ.")
            }
            Err(_) => Err(anyhow::anyhow!(
                "Timed out while trying to establish a TLS connection to RabbitMQ."
            )),
        }
    }
}

impl Connection {
    /// Open a new channel multiplexed over this connection.
    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    pub async fn create_channel(&self) -> Result<Channel, lapin::Error> {
        let channel = self.0.create_channel().await?;
        Ok(Channel(channel))
    }

    /// Whether the underlying connection is no longer usable.
    pub fn is_closed(&self) -> bool {
        !self.0.status().connected()
    }
}

impl AsRef<lapin::Connection> for Connection {
    fn as_ref(&self) -> &lapin::Connection {
        &self.0
    }
}

impl Channel {
    /// Get access to the underlying raw channel
    pub fn raw(&self) -> &lapin::Channel {
        &self.0
    }

    /// Close the channel on the broker.
    #[tracing::instrument(name = "rabbitmq_close_channel", skip(self))]
    pub async fn close(&self) -> Result<(), lapin::Error> {
        // 200 is the AMQP reply code for a deliberate, successful close.
        self.0.close(200, "channel closed").await
    }

    /// Apply a prefetch limit to the channel.
    ///
    /// RabbitMq does not implement prefetch sizes (a nonzero size is rejected
    /// by the broker), so only the count and the `global` flag are forwarded.
    #[tracing::instrument(name = "rabbitmq_channel_qos", skip(self))]
    pub async fn qos(&self, prefetch_count: u16, global: bool) -> Result<(), lapin::Error> {
        self.0
            .basic_qos(prefetch_count, BasicQosOptions { global })
            .await
    }
}

#[async_trait::async_trait]
impl BrokerChannel for Channel {
    async fn close(&self) -> Result<(), TransportError> {
        Ok(Channel::close(self).await?)
    }

    async fn set_qos(
        &self,
        prefetch_count: u16,
        _prefetch_size: u32,
        global: bool,
    ) -> Result<(), TransportError> {
        Ok(self.qos(prefetch_count, global).await?)
    }
}

#[async_trait::async_trait]
impl BrokerConnection for Connection {
    type Channel = Channel;

    fn is_closed(&self) -> bool {
        Connection::is_closed(self)
    }

    async fn open_channel(&self) -> Result<Channel, TransportError> {
        Ok(self.create_channel().await?)
    }
}
