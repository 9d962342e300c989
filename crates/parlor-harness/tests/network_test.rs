//! End-to-end tests over turmoil's simulated TCP.
//!
//! The server is driven step by step (accept, serve one frame) so the order
//! of events is fixed and every run is identical.

use parlor_harness::{SimClient, SimServer};
use parlor_proto::{
    ErrorPayload, Payload, RoomId,
    payloads::{
        records::MessageKind,
        requests::{JoinRoom, SendMessage},
        session::Hello,
    },
};

fn hello(user_id: &str) -> Payload {
    Payload::Hello(Hello::with_credential(format!(
        r#"{{"userId":"{user_id}","username":"{user_id}"}}"#
    )))
}

#[test]
fn message_reaches_other_member_over_tcp() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let mut server = SimServer::bind("0.0.0.0:443").await?;

        let alice = server.accept_connection().await?;
        assert!(server.serve_one(alice).await?);
        let bob = server.accept_connection().await?;
        assert!(server.serve_one(bob).await?);

        // alice: send message; bob: join unknown room
        assert!(server.serve_one(alice).await?);
        assert!(server.serve_one(bob).await?);

        // both hang up
        assert!(!server.serve_one(bob).await?);
        assert!(!server.serve_one(alice).await?);

        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.driver().presence().connected_count(), 0);
        assert_eq!(server.driver().message_log().total_messages(), 1);
        Ok(())
    });

    sim.client("clients", async {
        let mut alice = SimClient::connect("server:443").await?;
        let request_id = alice.send(hello("alice")).await?;
        let (reply_id, joined) =
            alice.recv_until(|p| matches!(p, Payload::RoomJoined(_))).await?;
        assert_eq!(reply_id, request_id);
        let Payload::RoomJoined(joined) = joined else { unreachable!() };
        assert_eq!(joined.room.room_id, RoomId::from("general"));
        assert!(joined.history.is_empty());

        let mut bob = SimClient::connect("server:443").await?;
        bob.send(hello("bob")).await?;
        bob.recv_until(|p| matches!(p, Payload::RoomJoined(_))).await?;

        alice
            .send(Payload::SendMessage(SendMessage {
                room_id: RoomId::from("general"),
                content: "hello over tcp".to_string(),
                kind: MessageKind::Text,
            }))
            .await?;

        let (push_id, delivered) = bob.recv_until(|p| matches!(p, Payload::NewMessage(_))).await?;
        assert_eq!(push_id, 0);
        let Payload::NewMessage(delivered) = delivered else { unreachable!() };
        assert_eq!(delivered.message.content, "hello over tcp");
        assert_eq!(delivered.message.author_id.as_str(), "alice");

        let request_id = bob
            .send(Payload::JoinRoom(JoinRoom { room_id: RoomId::from("nowhere") }))
            .await?;
        let (reply_id, error) = bob.recv_until(|p| matches!(p, Payload::Error(_))).await?;
        assert_eq!(reply_id, request_id);
        let Payload::Error(error) = error else { unreachable!() };
        assert_eq!(error.code, ErrorPayload::ROOM_NOT_FOUND);

        bob.close().await?;
        alice.close().await?;
        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn goodbye_closes_the_stream() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        let mut server = SimServer::bind("0.0.0.0:443").await?;
        let session = server.accept_connection().await?;
        assert!(server.serve_one(session).await?);
        assert!(server.serve_one(session).await?);
        assert_eq!(server.connection_count(), 0);
        Ok(())
    });

    sim.client("client", async {
        let mut client = SimClient::connect("server:443").await?;
        client.send(hello("carol")).await?;
        client.recv_until(|p| matches!(p, Payload::RoomJoined(_))).await?;

        client
            .send(Payload::Goodbye(parlor_proto::payloads::session::Goodbye {
                reason: "done".to_string(),
            }))
            .await?;

        // The server shuts its side; reads end instead of hanging.
        assert!(client.recv().await.is_err());
        Ok(())
    });

    sim.run().expect("simulation failed");
}
